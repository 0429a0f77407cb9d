//! # Request Dispatcher
//!
//! The consumer loop of the pipeline. It drains the bounded channel one payload
//! at a time, forwards each to a `TransportSender`, records the outcome on the
//! payload's trace slot and then waits one rate interval. The terminal sentinel
//! ends the loop; it is never forwarded.
//!
//! ## Outcomes vs. Faults
//!
//! A remote rejection is a normal result: it becomes a `Rejected` outcome, a
//! human-readable trace and a regular `Data` event. Only a transport *fault*
//! (the sender returning `Err`) is fatal. The dispatcher never retries; that is
//! the transport's business.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::channel::ChannelReceiver;
use crate::core::error::PipelineError;
use crate::core::events::{Event, EventSink, LoopRole};
use crate::core::payload::{ControlStatus, Payload};
use crate::core::pipeline::LoopReport;
use crate::core::rate_limiter::RateLimiter;

/// # Transport Outcome
///
/// What the remote side answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The request was accepted.
    Success {
        /// Status returned by the remote side.
        status: StatusCode,
    },
    /// The request was answered with an unexpected status.
    Rejected {
        /// Status returned by the remote side.
        status: StatusCode,
        /// Status the sender was waiting for.
        expected: StatusCode,
        /// Reason phrase reported with `status`.
        reason: String,
    },
}

impl Outcome {
    /// A rejection whose reason is the canonical phrase of `status`.
    pub fn rejected(status: StatusCode, expected: StatusCode) -> Self {
        Outcome::Rejected {
            status,
            expected,
            reason: reason_phrase(status).to_string(),
        }
    }

    /// Maps a received status against the expected one.
    pub fn from_status(status: StatusCode, expected: StatusCode) -> Self {
        if status == expected {
            Outcome::Success { status }
        } else {
            Outcome::rejected(status, expected)
        }
    }

    /// Returns `true` for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// The status the remote side returned.
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Success { status } | Outcome::Rejected { status, .. } => *status,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { status } => write!(f, "accepted with status '{}'", status.as_u16()),
            Outcome::Rejected {
                status,
                expected,
                reason,
            } => write!(
                f,
                "rejected with status '{}, {}', status '{}, {}' expected",
                status.as_u16(),
                reason,
                expected.as_u16(),
                reason_phrase(*expected)
            ),
        }
    }
}

fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown")
}

/// # Transport Sender
///
/// Ships one payload to the remote side. `Ok` carries the structured outcome,
/// `Err` is a fault that stops the dispatcher.
pub trait TransportSender<B>: Send + Sync {
    /// Sends `payload` and reports how the remote side answered.
    fn send(&self, payload: &Payload<B>) -> impl Future<Output = anyhow::Result<Outcome>> + Send;
}

/// # Dispatcher
///
/// The consumer loop. Owns the receiving half of the channel.
pub struct Dispatcher<B, T> {
    receiver: ChannelReceiver<Payload<B>>,
    transport: T,
    limiter: RateLimiter,
    events: Arc<dyn EventSink<B>>,
    cancel: CancellationToken,
}

impl<B, T> Dispatcher<B, T>
where
    B: Serialize + Send + Sync + 'static,
    T: TransportSender<B>,
{
    /// Creates a dispatcher draining `receiver` into `transport`.
    pub fn new(
        receiver: ChannelReceiver<Payload<B>>,
        transport: T,
        limiter: RateLimiter,
        events: Arc<dyn EventSink<B>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            transport,
            limiter,
            events,
            cancel,
        }
    }

    /// # Run
    ///
    /// Drains the channel until the sentinel arrives.
    ///
    /// ## Logic:
    /// 1.  Emits `Started`.
    /// 2.  Takes the next payload; the sentinel ends the loop with `Terminal`.
    /// 3.  Sends the payload, raced against cancellation, and stores the trace:
    ///     the JSON body on success, a rejection sentence otherwise.
    /// 4.  Emits `Data` and waits one interval.
    ///
    /// A transport fault ends the loop with `Failed` carrying the payload at
    /// hand. Cancellation ends it with `Interrupted` carrying the last payload
    /// that was fully handled. A channel closed before the sentinel is `Failed`.
    pub async fn run(mut self) -> LoopReport {
        self.emit(None, ControlStatus::Started);
        let mut handled = 0u64;
        let mut last: Option<Payload<B>> = None;

        loop {
            let mut payload = match self.receiver.take(&self.cancel).await {
                Ok(payload) => payload,
                Err(e) => return self.abort(last.as_ref(), handled, e),
            };
            if payload.is_terminal() {
                self.emit(Some(&payload), ControlStatus::Terminal);
                return LoopReport::Completed { items: handled };
            }

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
                res = self.transport.send(&payload) => res.map_err(PipelineError::TransportFault),
            };
            let trace = match sent.and_then(|outcome| trace_for(&payload, &outcome)) {
                Ok(trace) => trace,
                Err(e) if e.is_cancelled() => return self.abort(last.as_ref(), handled, e),
                Err(e) => return self.abort(Some(&payload), handled, e),
            };
            payload.trace = Some(trace);
            handled += 1;
            self.emit(Some(&payload), ControlStatus::Data);
            last = Some(payload);

            if let Err(e) = self.limiter.wait(&self.cancel).await {
                return self.abort(last.as_ref(), handled, e);
            }
        }
    }

    fn emit(&self, payload: Option<&Payload<B>>, status: ControlStatus) {
        self.events.on_event(&Event {
            role: LoopRole::Dispatcher,
            payload,
            status,
        });
    }

    fn abort(&self, payload: Option<&Payload<B>>, items: u64, error: PipelineError) -> LoopReport {
        if error.is_cancelled() {
            self.emit(payload, ControlStatus::Interrupted);
            LoopReport::Interrupted { items }
        } else {
            log::error!("Dispatcher stopping after {items} payloads: {error}");
            self.emit(payload, ControlStatus::Failed);
            LoopReport::Failed { items, error }
        }
    }
}

/// The trace stored on a dispatched payload.
fn trace_for<B: Serialize>(payload: &Payload<B>, outcome: &Outcome) -> Result<String, PipelineError> {
    match outcome {
        Outcome::Success { .. } => Ok(serde_json::to_string(&payload.body)?),
        Outcome::Rejected {
            status,
            expected,
            reason,
        } => Ok(format!(
            "Request (id={}) was rejected by remote side with status '{}, {}', status '{}, {}' expected",
            payload.id,
            status.as_u16(),
            reason,
            expected.as_u16(),
            reason_phrase(*expected)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::{bounded, ChannelSender};
    use crate::core::events::EventRecorder;
    use crate::core::rate_limiter::{RateSpec, TimeUnit};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedSender {
        calls: Arc<AtomicUsize>,
        answer: fn(usize) -> anyhow::Result<Outcome>,
    }

    impl TransportSender<serde_json::Value> for ScriptedSender {
        async fn send(&self, _payload: &Payload<serde_json::Value>) -> anyhow::Result<Outcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.answer)(n)
        }
    }

    fn accept(_: usize) -> anyhow::Result<Outcome> {
        Ok(Outcome::Success {
            status: StatusCode::CREATED,
        })
    }

    fn reject(_: usize) -> anyhow::Result<Outcome> {
        Ok(Outcome::rejected(StatusCode::BAD_REQUEST, StatusCode::CREATED))
    }

    fn fault_on_second(n: usize) -> anyhow::Result<Outcome> {
        if n == 1 {
            anyhow::bail!("connection reset by peer");
        }
        accept(n)
    }

    struct Harness {
        tx: ChannelSender<Payload<serde_json::Value>>,
        calls: Arc<AtomicUsize>,
        recorder: Arc<EventRecorder>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<LoopReport>,
    }

    fn start(answer: fn(usize) -> anyhow::Result<Outcome>) -> Harness {
        let (tx, rx) = bounded(4).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let recorder = Arc::new(EventRecorder::new());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            rx,
            ScriptedSender {
                calls: calls.clone(),
                answer,
            },
            RateLimiter::new(RateSpec::new(5, TimeUnit::Seconds).unwrap()),
            recorder.clone(),
            cancel.clone(),
        );
        Harness {
            tx,
            calls,
            recorder,
            cancel,
            task: tokio::spawn(dispatcher.run()),
        }
    }

    async fn feed(h: &Harness, ids: &[u64]) {
        for &id in ids {
            h.tx.put(Payload::new(id, json!({ "id": id })), &h.cancel).await.unwrap();
        }
    }

    async fn feed_sentinel(h: &Harness, id: u64) {
        h.tx.put(Payload::new(id, json!(null)).into_sentinel(), &h.cancel).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_trace_is_the_json_body() {
        let h = start(accept);
        feed(&h, &[1, 2]).await;
        feed_sentinel(&h, 99).await;

        let report = h.task.await.unwrap();

        assert!(matches!(report, LoopReport::Completed { items: 2 }));
        let events = h.recorder.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1].trace.as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(events[3].status, ControlStatus::Terminal);
        assert_eq!(events[3].payload_id, Some(99));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_data_not_failures() {
        let h = start(reject);
        feed(&h, &[1, 2, 3]).await;
        feed_sentinel(&h, 4).await;

        let report = h.task.await.unwrap();

        assert!(matches!(report, LoopReport::Completed { items: 3 }));
        assert_eq!(h.recorder.count(LoopRole::Dispatcher, ControlStatus::Data), 3);
        assert_eq!(h.recorder.count(LoopRole::Dispatcher, ControlStatus::Failed), 0);
        let trace = h.recorder.events()[2].trace.clone().unwrap();
        assert_eq!(
            trace,
            "Request (id=2) was rejected by remote side with status '400, Bad Request', status '201, Created' expected"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_fault_is_fatal() {
        let h = start(fault_on_second);
        feed(&h, &[1, 2, 3]).await;

        let report = h.task.await.unwrap();

        match report {
            LoopReport::Failed { items, error } => {
                assert_eq!(items, 1);
                assert!(matches!(error, PipelineError::TransportFault(_)));
            }
            other => panic!("unexpected report {other:?}"),
        }
        let last = h.recorder.events().pop().unwrap();
        assert_eq!(last.status, ControlStatus::Failed);
        assert_eq!(last.payload_id, Some(2));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting_for_input() {
        let h = start(accept);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();

        assert!(matches!(report, LoopReport::Interrupted { items: 0 }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        let last = h.recorder.events().pop().unwrap();
        assert_eq!(last.status, ControlStatus::Interrupted);
        assert_eq!(last.payload_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_is_sent_after_the_sentinel() {
        let h = start(accept);
        feed(&h, &[1]).await;
        feed_sentinel(&h, 2).await;
        feed(&h, &[3]).await;

        let report = h.task.await.unwrap();

        assert!(matches!(report, LoopReport::Completed { items: 1 }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.recorder.data_ids(LoopRole::Dispatcher), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_without_sentinel_fails() {
        let h = start(accept);
        feed(&h, &[1]).await;
        drop(h.tx);

        let report = h.task.await.unwrap();

        assert!(matches!(
            report,
            LoopReport::Failed {
                items: 1,
                error: PipelineError::ChannelClosed
            }
        ));
    }

    #[test]
    fn test_outcome_from_status() {
        assert!(Outcome::from_status(StatusCode::CREATED, StatusCode::CREATED).is_success());
        let rejected = Outcome::from_status(StatusCode::OK, StatusCode::CREATED);
        assert_eq!(rejected.status(), StatusCode::OK);
        assert_eq!(rejected.to_string(), "rejected with status '200, OK', status '201, Created' expected");
    }
}
