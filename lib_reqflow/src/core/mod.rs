//! # Core Engine Module
//!
//! The pipeline engine: everything needed to move payloads from a producer to
//! a remote side at a controlled pace.
//!
//! ## Core Components:
//!
//! - **`rate_limiter`**: turns "N per unit" into a fixed delay between two
//!   iterations of a loop.
//!
//! - **`channel`**: the bounded, cancellable FIFO between the two loops.
//!
//! - **`generator`**: the producer loop. Pulls payloads from a source, stamps
//!   them with a correlation token and closes the run with the terminal sentinel.
//!
//! - **`dispatcher`**: the consumer loop. Forwards every payload to a transport
//!   sender and records the outcome on the payload.
//!
//! - **`events`**: the lifecycle callbacks both loops report through, plus the
//!   shipped logging and recording sinks.
//!
//! - **`pipeline`**: wires the pieces together from a validated configuration
//!   and runs both loops on tokio tasks.

/// Aggregated configuration errors and runtime pipeline errors.
pub mod error;
/// Fixed-delay pacing from a `(count, unit)` rate.
pub mod rate_limiter;
/// The payload record and its control status.
pub mod payload;
/// The bounded single-producer, single-consumer channel.
pub mod channel;
/// Lifecycle events and event sinks.
pub mod events;
/// The producer loop.
pub mod generator;
/// The consumer loop and the transport contract.
pub mod dispatcher;
/// Orchestration of a full run.
pub mod pipeline;

// --- Public API Re-exports ---
pub use channel::{bounded, ChannelReceiver, ChannelSender};
pub use dispatcher::{Dispatcher, Outcome, TransportSender};
pub use error::{ConfigError, PipelineError};
pub use events::{Event, EventRecorder, EventSink, LogEventSink, LoopRole, RecordedEvent};
pub use generator::{GenerationTarget, Generator, PayloadSink, PayloadSource};
pub use payload::{ControlStatus, Payload};
pub use pipeline::{LoopReport, Pipeline, PipelineHandle, PipelineReport};
pub use rate_limiter::{RateLimiter, RateSpec, TimeUnit};
