//! # Configuration Modules
//!
//! The host-facing configuration surface of the pipeline. Raw values are read
//! from JSON (or built in code), then validated in one pass that reports every
//! invalid field together.

/// Pipeline configuration, its JSON loaders and its aggregated validation.
pub mod config_pipeline;
