//! # Payload
//!
//! The single record type flowing through the pipeline: an identity, a control
//! status, two annotation slots and an opaque body. The loop that currently owns
//! a payload is the only one that touches it, so none of the fields need
//! synchronization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// # Control Status
///
/// Lifecycle marker carried by payloads and by pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlStatus {
    /// A loop has started.
    Started,
    /// A regular unit of work.
    Data,
    /// The terminal sentinel; also the status of a loop's normal completion event.
    Terminal,
    /// A loop was stopped by the cancellation token.
    Interrupted,
    /// A loop hit an unrecoverable error.
    Failed,
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlStatus::Started => "STARTED",
            ControlStatus::Data => "DATA",
            ControlStatus::Terminal => "TERMINAL",
            ControlStatus::Interrupted => "INTERRUPTED",
            ControlStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// # Payload
///
/// One unit of work. `B` is whatever the transport sender knows how to ship.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload<B> {
    /// Identity assigned by the payload source; never reused within a run.
    pub id: u64,
    /// Current control status.
    pub status: ControlStatus,
    /// Correlation token attached by the generator before hand-off.
    pub correlation: Option<String>,
    /// Result record attached by the dispatcher after the transport call.
    pub trace: Option<String>,
    /// The opaque domain body.
    pub body: B,
}

impl<B> Payload<B> {
    /// Creates a regular `Data` payload without annotations.
    pub fn new(id: u64, body: B) -> Self {
        Self {
            id,
            status: ControlStatus::Data,
            correlation: None,
            trace: None,
            body,
        }
    }

    /// Turns this payload into the terminal sentinel, dropping any annotation.
    pub fn into_sentinel(mut self) -> Self {
        self.status = ControlStatus::Terminal;
        self.correlation = None;
        self.trace = None;
        self
    }

    /// Returns `true` for the terminal sentinel.
    pub fn is_terminal(&self) -> bool {
        self.status == ControlStatus::Terminal
    }
}

impl<B> fmt::Display for Payload<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Payload {{id='{}', status='{}', correlation='{}', trace='{}'}}",
            self.id,
            self.status,
            self.correlation.as_deref().unwrap_or(""),
            self.trace.as_deref().unwrap_or("")
        )
    }
}
