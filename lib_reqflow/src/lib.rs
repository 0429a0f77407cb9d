//! # lib_reqflow
//!
//! A rate-limited, bounded producer/consumer request pipeline.
//!
//! A `Generator` produces payloads at its own pace and hands them to a bounded
//! FIFO channel; a `Dispatcher` drains the channel and forwards every payload to
//! a transport sender no faster than its configured rate. A terminal sentinel
//! payload closes the run, and both loops report their progress to a shared
//! `EventSink`.
//!
//! ## Modules
//!
//! - **`core`**: the pipeline engine (rate limiting, channel, loops, events).
//! - **`configs`**: the host-facing configuration surface with aggregated validation.
//! - **`retrieve`** (feature `retrieve`): a retrying HTTP client.
//! - **`senders`** (feature `senders`): transport senders built on `retrieve`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod core;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "senders")]
pub mod senders;

// --- Public API Re-exports ---
pub use crate::configs::config_pipeline::{ConfigFileError, PipelineConfig, RateConfig, ValidatedConfig};
pub use crate::core::{
    bounded, ChannelReceiver, ChannelSender, ConfigError, ControlStatus, Dispatcher, Event,
    EventRecorder, EventSink, Generator, GenerationTarget, LogEventSink, LoopReport, LoopRole,
    Outcome, Payload, PayloadSink, PayloadSource, Pipeline, PipelineError, PipelineHandle,
    PipelineReport, RateLimiter, RateSpec, RecordedEvent, TimeUnit, TransportSender,
};
