//! # Request Generator
//!
//! The producer loop of the pipeline. It pulls payloads from a `PayloadSource`,
//! stamps each with a correlation token, hands it to a `PayloadSink` (normally
//! the bounded channel) and then sleeps for one rate interval. When the target
//! is reached it sends the terminal sentinel, which tells the dispatcher that
//! nothing else will follow.
//!
//! ## Stopping
//!
//! - The **stop** token is graceful: production ends at the next iteration
//!   boundary, the sentinel is still sent and the loop reports `Terminal`.
//!   A fixed run that stops short of its target returns `LoopReport::Stopped`.
//! - The **cancel** token is hard: any pending hand-off or wait returns at once,
//!   no sentinel is sent and the loop reports `Interrupted`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::error::{ConfigError, PipelineError};
use crate::core::events::{Event, EventSink, LoopRole};
use crate::core::payload::{ControlStatus, Payload};
use crate::core::pipeline::LoopReport;
use crate::core::rate_limiter::RateLimiter;

/// Largest number of payloads a fixed run may produce.
pub const MAX_FIXED_TARGET: u32 = 10_000;

/// # Payload Source
///
/// Creates payloads on demand. Called once per item plus once for the sentinel;
/// ids must never repeat within a run. Unbounded runs only check for a repeat
/// of the sentinel id or of the previous id.
pub trait PayloadSource<B>: Send {
    /// Produces the next payload.
    fn next_payload(&mut self) -> Result<Payload<B>, PipelineError>;
}

impl<B, F> PayloadSource<B> for F
where
    F: FnMut() -> Result<Payload<B>, PipelineError> + Send,
{
    fn next_payload(&mut self) -> Result<Payload<B>, PipelineError> {
        self()
    }
}

/// # Payload Sink
///
/// The generator's hand-off. `ChannelSender` implements it; tests substitute
/// their own.
pub trait PayloadSink<B>: Send + Sync {
    /// Delivers one payload, suspending while the receiver cannot accept it.
    fn send(
        &self,
        payload: Payload<B>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;
}

/// How many payloads a generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTarget {
    /// Exactly `n` payloads, then the sentinel. `Fixed(0)` sends only the sentinel.
    Fixed(u32),
    /// Payloads until the stop token fires, then the sentinel.
    Unbounded,
}

impl GenerationTarget {
    /// Checks the fixed count against `[0, MAX_FIXED_TARGET]`.
    pub fn validate(self) -> Result<Self, ConfigError> {
        match self {
            GenerationTarget::Fixed(n) if n > MAX_FIXED_TARGET => Err(ConfigError::single(format!(
                "generatorCount: {n} is outside [0, {MAX_FIXED_TARGET}]"
            ))),
            other => Ok(other),
        }
    }

    fn reached(self, produced: u64) -> bool {
        match self {
            GenerationTarget::Fixed(n) => produced >= u64::from(n),
            GenerationTarget::Unbounded => false,
        }
    }
}

/// Rejects repeated payload ids.
///
/// A fixed run remembers every id, at most `MAX_FIXED_TARGET + 1` of them. An
/// unbounded run keeps constant state and only rejects the sentinel id and a
/// repeat of the previous id.
#[derive(Debug)]
enum IdGuard {
    All(HashSet<u64>),
    Recent { sentinel: u64, previous: Option<u64> },
}

impl IdGuard {
    fn new(target: GenerationTarget, sentinel: u64) -> Self {
        match target {
            GenerationTarget::Fixed(_) => IdGuard::All(HashSet::from([sentinel])),
            GenerationTarget::Unbounded => IdGuard::Recent {
                sentinel,
                previous: None,
            },
        }
    }

    /// Returns `false` when `id` repeats one this guard tracks.
    fn admit(&mut self, id: u64) -> bool {
        match self {
            IdGuard::All(seen) => seen.insert(id),
            IdGuard::Recent { sentinel, previous } => {
                if id == *sentinel || *previous == Some(id) {
                    return false;
                }
                *previous = Some(id);
                true
            }
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        match self {
            IdGuard::All(seen) => seen.len(),
            IdGuard::Recent { previous, .. } => 1 + usize::from(previous.is_some()),
        }
    }
}

type TokenFactory = Box<dyn FnMut() -> String + Send>;

/// # Generator
///
/// The producer loop. Build it with [`Generator::new`], then drive it to
/// completion with [`Generator::run`], typically on its own tokio task.
pub struct Generator<B, S, K> {
    source: S,
    target: GenerationTarget,
    limiter: RateLimiter,
    sink: K,
    events: Arc<dyn EventSink<B>>,
    cancel: CancellationToken,
    stop: CancellationToken,
    tokens: TokenFactory,
}

impl<B, S, K> Generator<B, S, K>
where
    B: Clone + Send + 'static,
    S: PayloadSource<B>,
    K: PayloadSink<B>,
{
    /// Creates a generator.
    ///
    /// # Errors
    /// A `ConfigError` when a fixed target exceeds `MAX_FIXED_TARGET`.
    pub fn new(
        source: S,
        target: GenerationTarget,
        limiter: RateLimiter,
        sink: K,
        events: Arc<dyn EventSink<B>>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            source,
            target: target.validate()?,
            limiter,
            sink,
            events,
            cancel,
            stop: CancellationToken::new(),
            tokens: Box::new(|| Uuid::new_v4().to_string()),
        })
    }

    /// Uses `stop` as the graceful stop signal.
    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Replaces the default UUID v4 correlation tokens.
    pub fn with_correlation_tokens(mut self, tokens: impl FnMut() -> String + Send + 'static) -> Self {
        self.tokens = Box::new(tokens);
        self
    }

    /// # Run
    ///
    /// Drives the loop to its end and returns what happened.
    ///
    /// ## Logic:
    /// 1.  Emits `Started`.
    /// 2.  Takes one payload from the source and turns it into the sentinel, so a
    ///     broken source is detected before anything is sent.
    /// 3.  Until the target is reached or the stop token fires: takes a payload,
    ///     rejects duplicate ids, attaches a correlation token, sends it, emits
    ///     `Data` and waits one interval.
    /// 4.  Sends the sentinel without waiting and emits `Terminal`.
    ///
    /// A failing source or sink ends the loop with `Failed`; cancellation ends it
    /// with `Interrupted`. Neither sends the sentinel.
    pub async fn run(mut self) -> LoopReport {
        self.emit(None, ControlStatus::Started);

        let sentinel = match self.source.next_payload() {
            Ok(payload) => payload.into_sentinel(),
            Err(e) => return self.abort(None, 0, e),
        };
        let mut ids = IdGuard::new(self.target, sentinel.id);
        let mut produced = 0u64;
        let mut last: Option<Payload<B>> = None;

        while !self.target.reached(produced) {
            if self.stop.is_cancelled() {
                log::info!("Generator received a stop request after {produced} payloads");
                break;
            }

            let mut payload = match self.source.next_payload() {
                Ok(payload) => payload,
                Err(e) => return self.abort(last.as_ref(), produced, e),
            };
            if !ids.admit(payload.id) {
                let err = PipelineError::SourceFault(format!("duplicate payload id {}", payload.id));
                return self.abort(Some(&payload), produced, err);
            }
            payload.status = ControlStatus::Data;
            payload.correlation = Some((self.tokens)());

            let record = payload.clone();
            if let Err(e) = self.sink.send(payload, &self.cancel).await {
                return self.abort(Some(&record), produced, e);
            }
            produced += 1;
            self.emit(Some(&record), ControlStatus::Data);
            last = Some(record);

            tokio::select! {
                biased;
                res = self.limiter.wait(&self.cancel) => {
                    if let Err(e) = res {
                        return self.abort(last.as_ref(), produced, e);
                    }
                }
                _ = self.stop.cancelled() => {
                    log::info!("Generator received a stop request after {produced} payloads");
                    break;
                }
            }
        }

        let record = sentinel.clone();
        if let Err(e) = self.sink.send(sentinel, &self.cancel).await {
            return self.abort(last.as_ref(), produced, e);
        }
        self.emit(Some(&record), ControlStatus::Terminal);
        match self.target {
            GenerationTarget::Fixed(n) if produced < u64::from(n) => LoopReport::Stopped {
                items: produced,
                requested: u64::from(n),
            },
            _ => LoopReport::Completed { items: produced },
        }
    }

    fn emit(&self, payload: Option<&Payload<B>>, status: ControlStatus) {
        self.events.on_event(&Event {
            role: LoopRole::Generator,
            payload,
            status,
        });
    }

    fn abort(&self, payload: Option<&Payload<B>>, items: u64, error: PipelineError) -> LoopReport {
        if error.is_cancelled() {
            self.emit(payload, ControlStatus::Interrupted);
            LoopReport::Interrupted { items }
        } else {
            log::debug!("Generator stopping after {items} payloads: {error}");
            self.emit(payload, ControlStatus::Failed);
            LoopReport::Failed { items, error }
        }
    }
}
