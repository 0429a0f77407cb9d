//! # Pipeline Orchestrator
//!
//! Wires one generator, one bounded channel and one dispatcher together from a
//! validated configuration and runs both loops on their own tokio tasks.
//!
//! The host keeps a [`PipelineHandle`] to steer the run: `stop()` asks the
//! generator to finish gracefully (the sentinel is still sent), `cancel()`
//! interrupts both loops at once. `join()` waits for both and returns a
//! [`PipelineReport`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::configs::config_pipeline::{PipelineConfig, ValidatedConfig};
use crate::core::channel::bounded;
use crate::core::dispatcher::{Dispatcher, TransportSender};
use crate::core::error::PipelineError;
use crate::core::events::EventSink;
use crate::core::generator::{Generator, PayloadSource};
use crate::core::payload::Payload;
use crate::core::rate_limiter::RateLimiter;

/// # Loop Report
///
/// How one loop ended and how many regular payloads it handled.
#[derive(Debug)]
pub enum LoopReport {
    /// The loop exchanged the sentinel.
    Completed {
        /// Regular payloads handled.
        items: u64,
    },
    /// A fixed run was stopped gracefully before its target; the sentinel
    /// was still exchanged.
    Stopped {
        /// Regular payloads handled before the stop.
        items: u64,
        /// The fixed target of the run.
        requested: u64,
    },
    /// The loop was stopped by the cancellation token.
    Interrupted {
        /// Regular payloads handled before the interruption.
        items: u64,
    },
    /// The loop hit an unrecoverable error.
    Failed {
        /// Regular payloads handled before the failure.
        items: u64,
        /// What went wrong.
        error: PipelineError,
    },
}

impl LoopReport {
    /// Regular payloads handled, whatever the ending.
    pub fn items(&self) -> u64 {
        match self {
            LoopReport::Completed { items }
            | LoopReport::Stopped { items, .. }
            | LoopReport::Interrupted { items }
            | LoopReport::Failed { items, .. } => *items,
        }
    }

    /// Returns `true` for `Completed`.
    pub fn is_completed(&self) -> bool {
        matches!(self, LoopReport::Completed { .. })
    }

    /// Returns `true` when the sentinel was exchanged, whether or not a fixed
    /// target was reached.
    pub fn is_drained(&self) -> bool {
        matches!(self, LoopReport::Completed { .. } | LoopReport::Stopped { .. })
    }

    /// The error of a failed loop.
    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            LoopReport::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for LoopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopReport::Completed { items } => write!(f, "completed after {items} payloads"),
            LoopReport::Stopped { items, requested } => {
                write!(f, "stopped after {items} of {requested} payloads")
            }
            LoopReport::Interrupted { items } => write!(f, "interrupted after {items} payloads"),
            LoopReport::Failed { items, error } => write!(f, "failed after {items} payloads: {error}"),
        }
    }
}

/// # Pipeline Report
///
/// The reports of both loops of one run.
#[derive(Debug)]
pub struct PipelineReport {
    /// How the producer loop ended.
    pub generator: LoopReport,
    /// How the consumer loop ended.
    pub dispatcher: LoopReport,
}

impl PipelineReport {
    /// Returns `true` when both loops completed and every produced payload was
    /// dispatched. A fixed run stopped before its target is not complete.
    pub fn is_complete(&self) -> bool {
        self.generator.is_completed()
            && self.dispatcher.is_completed()
            && self.generator.items() == self.dispatcher.items()
    }

    /// Returns `true` when both loops exchanged the sentinel and every produced
    /// payload was dispatched, including runs stopped before their target.
    pub fn is_drained(&self) -> bool {
        self.generator.is_drained()
            && self.dispatcher.is_drained()
            && self.generator.items() == self.dispatcher.items()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generator {}, dispatcher {}", self.generator, self.dispatcher)
    }
}

/// # Pipeline
///
/// A validated pipeline definition, ready to be spawned.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ValidatedConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Creates a pipeline from an already validated configuration.
    pub fn new(config: ValidatedConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Validates `config` and creates a pipeline from it.
    ///
    /// # Errors
    /// `InvalidConfig` listing every invalid field.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(config.validate()?))
    }

    /// Derives the run's cancellation token from `parent`, so cancelling the
    /// parent also cancels the run.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// The validated configuration.
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// # Spawn
    ///
    /// Creates the channel and starts both loops on tokio tasks.
    ///
    /// # Errors
    /// `InvalidConfig` if the channel or generator rejects the configuration.
    pub fn spawn<B, S, T>(
        &self,
        source: S,
        transport: T,
        events: Arc<dyn EventSink<B>>,
    ) -> Result<PipelineHandle, PipelineError>
    where
        B: Clone + Serialize + Send + Sync + 'static,
        S: PayloadSource<B> + 'static,
        T: TransportSender<B> + 'static,
    {
        let cfg = &self.config;
        let (tx, rx) = bounded::<Payload<B>>(cfg.capacity)?;
        let cancel = self.cancel.clone();
        let stop = CancellationToken::new();

        let generator = Generator::new(
            source,
            cfg.target,
            RateLimiter::new(cfg.generator),
            tx,
            Arc::clone(&events),
            cancel.clone(),
        )?
        .with_stop_token(stop.clone());
        let dispatcher = Dispatcher::new(rx, transport, RateLimiter::new(cfg.dispatcher), events, cancel.clone());

        log::info!(
            "Starting pipeline: generator {} target {:?}, dispatcher {}, capacity {}",
            cfg.generator,
            cfg.target,
            cfg.dispatcher,
            cfg.capacity
        );
        Ok(PipelineHandle {
            cancel,
            stop,
            generator: tokio::spawn(generator.run()),
            dispatcher: tokio::spawn(dispatcher.run()),
        })
    }

    /// Spawns the pipeline and waits for both loops.
    pub async fn run<B, S, T>(
        &self,
        source: S,
        transport: T,
        events: Arc<dyn EventSink<B>>,
    ) -> Result<PipelineReport, PipelineError>
    where
        B: Clone + Serialize + Send + Sync + 'static,
        S: PayloadSource<B> + 'static,
        T: TransportSender<B> + 'static,
    {
        Ok(self.spawn(source, transport, events)?.join().await)
    }
}

/// # Pipeline Handle
///
/// Control over a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    cancel: CancellationToken,
    stop: CancellationToken,
    generator: JoinHandle<LoopReport>,
    dispatcher: JoinHandle<LoopReport>,
}

impl PipelineHandle {
    /// Asks the generator to stop producing; queued payloads are still dispatched.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Interrupts both loops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the run's cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A clone of the generator's graceful stop token.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Returns `true` once both loops have returned.
    pub fn is_finished(&self) -> bool {
        self.generator.is_finished() && self.dispatcher.is_finished()
    }

    /// Waits for both loops.
    pub async fn join(self) -> PipelineReport {
        let (generator, dispatcher) = tokio::join!(self.generator, self.dispatcher);
        PipelineReport {
            generator: flatten(generator),
            dispatcher: flatten(dispatcher),
        }
    }
}

fn flatten(joined: Result<LoopReport, tokio::task::JoinError>) -> LoopReport {
    joined.unwrap_or_else(|e| LoopReport::Failed {
        items: 0,
        error: PipelineError::TaskJoin(e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::config_pipeline::RateConfig;
    use crate::core::dispatcher::Outcome;
    use crate::core::events::{EventRecorder, LoopRole};
    use crate::core::payload::ControlStatus;
    use http::StatusCode;
    use std::time::Duration;

    struct Accepting;

    impl TransportSender<u64> for Accepting {
        async fn send(&self, _payload: &Payload<u64>) -> anyhow::Result<Outcome> {
            Ok(Outcome::Success {
                status: StatusCode::CREATED,
            })
        }
    }

    struct Faulty;

    impl TransportSender<u64> for Faulty {
        async fn send(&self, _payload: &Payload<u64>) -> anyhow::Result<Outcome> {
            anyhow::bail!("remote unreachable")
        }
    }

    fn source() -> impl PayloadSource<u64> {
        let mut id = 0u64;
        move || {
            id += 1;
            Ok::<_, PipelineError>(Payload::new(id, id))
        }
    }

    fn config(count: i64, capacity: i64) -> PipelineConfig {
        PipelineConfig {
            generator: RateConfig::new(100, "seconds"),
            generator_count: count,
            dispatcher: RateConfig::new(50, "seconds"),
            capacity,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_and_reports_matching_counts() {
        let recorder = Arc::new(EventRecorder::new());
        let pipeline = Pipeline::from_config(&config(6, 2)).unwrap();

        let report = pipeline.run(source(), Accepting, recorder.clone()).await.unwrap();

        assert!(report.is_complete(), "{report}");
        assert_eq!(report.dispatcher.items(), 6);
        assert!(recorder.pipeline_completed());
        assert_eq!(recorder.data_ids(LoopRole::Dispatcher), vec![2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_propagates_as_closed_channel_to_the_generator() {
        let recorder = Arc::new(EventRecorder::new());
        let pipeline = Pipeline::from_config(&config(20, 1)).unwrap();

        let report = pipeline.run(source(), Faulty, recorder.clone()).await.unwrap();

        assert!(!report.is_complete());
        assert!(matches!(report.dispatcher.error(), Some(PipelineError::TransportFault(_))));
        assert!(matches!(report.generator.error(), Some(PipelineError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_both_loops() {
        let recorder = Arc::new(EventRecorder::new());
        let mut cfg = config(10_000, 10);
        cfg.generator = RateConfig::new(1, "seconds");
        let handle = Pipeline::from_config(&cfg)
            .unwrap()
            .spawn(source(), Accepting, recorder.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        let report = tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();

        assert!(matches!(report.generator, LoopReport::Interrupted { .. }));
        assert!(matches!(report.dispatcher, LoopReport::Interrupted { .. }));
        assert_eq!(recorder.last_status(LoopRole::Generator), Some(ControlStatus::Interrupted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_cancels_the_run() {
        let parent = CancellationToken::new();
        let recorder = Arc::new(EventRecorder::new());
        let handle = Pipeline::from_config(&config(10_000, 10))
            .unwrap()
            .with_parent_token(&parent)
            .spawn(source(), Accepting, recorder)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        parent.cancel();
        let report = handle.join().await;

        assert!(report.generator.items() > 0);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_spawning() {
        let err = Pipeline::from_config(&config(0, 0)).unwrap_err();
        match err {
            PipelineError::InvalidConfig(e) => {
                assert!(e.mentions("generatorCount"));
                assert!(e.mentions("capacity"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
