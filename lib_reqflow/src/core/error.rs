//! # Pipeline Errors
//!
//! Error types shared by every component of the pipeline engine.
//!
//! Configuration problems are collected into a single [`ConfigError`] so that a
//! host sees every invalid field at once. Runtime problems are expressed as
//! [`PipelineError`]; a loop never re-throws them to the other loop, it reports
//! them through its `EventSink` and returns them inside its `LoopReport`.

use std::fmt;

use thiserror::Error;

/// # Configuration Error
///
/// An aggregated list of every configuration problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ConfigError {
    /// One human-readable entry per invalid field.
    pub problems: Vec<String>,
}

impl ConfigError {
    /// Creates an error holding a single problem.
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }

    /// Converts a list of collected problems into a result.
    pub fn check(problems: Vec<String>) -> Result<(), Self> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self { problems })
        }
    }

    /// Returns `true` when one of the problems mentions `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.problems.iter().any(|p| p.contains(field))
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "There are null, empty or wrong value fields: {}", self.problems.join("; "))
    }
}

/// # Pipeline Error
///
/// Runtime and construction failures of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad construction parameters; raised before any loop starts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The shared cancellation token fired while the caller was suspended.
    #[error("operation cancelled")]
    Cancelled,

    /// The opposite half of the channel is gone.
    #[error("channel closed before the terminal sentinel was exchanged")]
    ChannelClosed,

    /// The transport sender itself failed (not a structured rejection).
    #[error("transport fault: {0:#}")]
    TransportFault(anyhow::Error),

    /// The payload source failed or produced an invalid payload.
    #[error("payload source fault: {0}")]
    SourceFault(String),

    /// The payload body could not be serialized into a trace record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pipeline task panicked or was aborted.
    #[error("pipeline task failed to join: {0}")]
    TaskJoin(String),
}

impl PipelineError {
    /// Returns `true` for the graceful cancellation path.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
