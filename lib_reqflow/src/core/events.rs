//! # Pipeline Events
//!
//! Both loops report their lifecycle through one callback type: a start event,
//! one `Data` event per handled payload, and exactly one closing event
//! (`Terminal`, `Interrupted` or `Failed`). A host can tell a completed run
//! from an aborted one purely from that sequence.
//!
//! Sinks run inline in the hot loops and are called from two tasks at once, so
//! they must return quickly and synchronize any state they keep.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::payload::{ControlStatus, Payload};

/// Which loop produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopRole {
    /// The producer loop.
    Generator,
    /// The consumer loop.
    Dispatcher,
}

impl fmt::Display for LoopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopRole::Generator => f.write_str("RequestGenerator"),
            LoopRole::Dispatcher => f.write_str("RequestDispatcher"),
        }
    }
}

/// # Event
///
/// A borrowed view handed to the sink. `payload` is `None` for start events and
/// for failures that happen before any payload was handled.
#[derive(Debug)]
pub struct Event<'a, B> {
    /// Loop that emitted the event.
    pub role: LoopRole,
    /// The payload the event is about, if any.
    pub payload: Option<&'a Payload<B>>,
    /// What happened.
    pub status: ControlStatus,
}

/// # Event Sink
///
/// Receives every event from both loops.
pub trait EventSink<B>: Send + Sync {
    /// Handles one event. Must not block.
    fn on_event(&self, event: &Event<'_, B>);
}

impl<B, F> EventSink<B> for F
where
    F: Fn(&Event<'_, B>) + Send + Sync,
{
    fn on_event(&self, event: &Event<'_, B>) {
        self(event)
    }
}

/// Human-readable description of a loop status.
pub fn describe(status: ControlStatus) -> &'static str {
    match status {
        ControlStatus::Started => "has started successfully.",
        ControlStatus::Data => "is running, data trace -> ",
        ControlStatus::Terminal => "has completed, all data processed",
        ControlStatus::Interrupted => "was interrupted, exiting",
        ControlStatus::Failed => "has failed with a critical error",
    }
}

/// # Log Event Sink
///
/// Writes one `log` record per event. The generator's data lines show the
/// payload id, the dispatcher's show the transport trace.
#[derive(Debug, Clone, Default)]
pub struct LogEventSink;

impl<B> EventSink<B> for LogEventSink {
    fn on_event(&self, event: &Event<'_, B>) {
        let head = format!("Thread '{}' {}", event.role, describe(event.status));
        match event.status {
            ControlStatus::Started | ControlStatus::Terminal => log::info!("{head}"),
            ControlStatus::Data => {
                let detail = match (event.role, event.payload) {
                    (LoopRole::Generator, Some(p)) => p.id.to_string(),
                    (LoopRole::Dispatcher, Some(p)) => p.trace.clone().unwrap_or_default(),
                    (_, None) => String::new(),
                };
                log::info!("{head}{detail}");
            }
            ControlStatus::Interrupted => {
                log::warn!("{head} (last payload: {:?})", event.payload.map(|p| p.id));
            }
            ControlStatus::Failed => {
                log::error!("{head} (last payload: {:?})", event.payload.map(|p| p.id));
            }
        }
    }
}

/// An owned copy of the interesting parts of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Loop that emitted the event.
    pub role: LoopRole,
    /// What happened.
    pub status: ControlStatus,
    /// Id of the payload, if the event carried one.
    pub payload_id: Option<u64>,
    /// Status stored on the payload when the event fired.
    pub payload_status: Option<ControlStatus>,
    /// Correlation token of the payload.
    pub correlation: Option<String>,
    /// Transport trace of the payload.
    pub trace: Option<String>,
}

/// # Event Recorder
///
/// A thread-safe, in-memory sink. Hosts use it to decide overall success from
/// the event sequence, tests use it to assert on ordering.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every event recorded so far, in arrival order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    /// Events emitted by one loop, in arrival order.
    pub fn events_of(&self, role: LoopRole) -> Vec<RecordedEvent> {
        self.lock().iter().filter(|e| e.role == role).cloned().collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of events with the given role and status.
    pub fn count(&self, role: LoopRole, status: ControlStatus) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.role == role && e.status == status)
            .count()
    }

    /// Ids carried by one loop's `Data` events, in order.
    pub fn data_ids(&self, role: LoopRole) -> Vec<u64> {
        self.lock()
            .iter()
            .filter(|e| e.role == role && e.status == ControlStatus::Data)
            .filter_map(|e| e.payload_id)
            .collect()
    }

    /// Status of the last event of a loop, if it emitted anything.
    pub fn last_status(&self, role: LoopRole) -> Option<ControlStatus> {
        self.lock().iter().rev().find(|e| e.role == role).map(|e| e.status)
    }

    /// Returns `true` when both loops closed with `Terminal` after the same
    /// number of `Data` events. A graceful stop also closes with `Terminal`, so
    /// use [`EventRecorder::delivered`] to check a fixed target.
    pub fn pipeline_completed(&self) -> bool {
        self.last_status(LoopRole::Generator) == Some(ControlStatus::Terminal)
            && self.last_status(LoopRole::Dispatcher) == Some(ControlStatus::Terminal)
            && self.count(LoopRole::Generator, ControlStatus::Data)
                == self.count(LoopRole::Dispatcher, ControlStatus::Data)
    }

    /// Returns `true` when the pipeline completed after dispatching exactly
    /// `requested` payloads.
    pub fn delivered(&self, requested: u64) -> bool {
        self.pipeline_completed()
            && self.count(LoopRole::Dispatcher, ControlStatus::Data) as u64 == requested
    }
}

impl<B> EventSink<B> for EventRecorder {
    fn on_event(&self, event: &Event<'_, B>) {
        let recorded = RecordedEvent {
            role: event.role,
            status: event.status,
            payload_id: event.payload.map(|p| p.id),
            payload_status: event.payload.map(|p| p.status),
            correlation: event.payload.and_then(|p| p.correlation.clone()),
            trace: event.payload.and_then(|p| p.trace.clone()),
        };
        self.lock().push(recorded);
    }
}
