//! # Pipeline Configuration
//!
//! The raw, serde-friendly pipeline settings (camelCase JSON with defaults)
//! and their validation into a `ValidatedConfig`. Every invalid field is
//! reported in one `ConfigError`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::channel::{MAX_CAPACITY, MIN_CAPACITY};
use crate::core::error::ConfigError;
use crate::core::generator::{GenerationTarget, MAX_FIXED_TARGET};
use crate::core::rate_limiter::RateSpec;

/// Errors raised while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        /// The file that was requested.
        path: PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The content is not a valid configuration document.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// # Rate Configuration
///
/// A rate as it appears in JSON: `{ "limit": 30, "unit": "minutes" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateConfig {
    /// Operations allowed per unit.
    pub limit: i64,
    /// Unit name, e.g. `"seconds"` or `"ms"`.
    pub unit: String,
}

impl RateConfig {
    /// Creates a raw rate.
    pub fn new(limit: i64, unit: impl Into<String>) -> Self {
        Self {
            limit,
            unit: unit.into(),
        }
    }
}

impl fmt::Display for RateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}", self.limit, self.unit)
    }
}

/// # Pipeline Configuration
///
/// Raw, unvalidated pipeline settings. Missing JSON fields fall back to the
/// defaults: generator 2 per second producing 10 payloads, dispatcher 30 per
/// minute, channel capacity 10.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Producer rate.
    pub generator: RateConfig,
    /// Number of payloads to produce, `[1, 10000]`.
    pub generator_count: i64,
    /// Consumer rate.
    pub dispatcher: RateConfig,
    /// Channel capacity, `[1, 10000]`.
    pub capacity: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generator: RateConfig::new(2, "seconds"),
            generator_count: 10,
            dispatcher: RateConfig::new(30, "minutes"),
            capacity: 10,
        }
    }
}

impl PipelineConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigFileError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// # Validate
    ///
    /// Checks every field and returns either a ready-to-use configuration or a
    /// single `ConfigError` listing all problems found.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let mut problems = Vec::new();

        let generator = RateSpec::parse("generator", self.generator.limit, &self.generator.unit)
            .map_err(|e| problems.extend(e.problems))
            .ok();
        let dispatcher = RateSpec::parse("dispatcher", self.dispatcher.limit, &self.dispatcher.unit)
            .map_err(|e| problems.extend(e.problems))
            .ok();

        let count = u32::try_from(self.generator_count)
            .ok()
            .filter(|n| (1..=MAX_FIXED_TARGET).contains(n));
        if count.is_none() {
            problems.push(format!(
                "generatorCount: {} is outside [1, {MAX_FIXED_TARGET}]",
                self.generator_count
            ));
        }

        let capacity = usize::try_from(self.capacity)
            .ok()
            .filter(|c| (MIN_CAPACITY..=MAX_CAPACITY).contains(c));
        if capacity.is_none() {
            problems.push(format!(
                "capacity: {} is outside [{MIN_CAPACITY}, {MAX_CAPACITY}]",
                self.capacity
            ));
        }

        match (generator, count, dispatcher, capacity) {
            (Some(generator), Some(count), Some(dispatcher), Some(capacity)) => Ok(ValidatedConfig {
                generator,
                target: GenerationTarget::Fixed(count),
                dispatcher,
                capacity,
            }),
            _ => Err(ConfigError { problems }),
        }
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineConfig
    Generator: {} ({} payloads),
    Dispatcher: {},
    Capacity: {}
",
            self.generator, self.generator_count, self.dispatcher, self.capacity
        )
    }
}

/// # Validated Configuration
///
/// Typed settings that every pipeline component accepts as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedConfig {
    /// Producer rate.
    pub generator: RateSpec,
    /// How many payloads the producer emits.
    pub target: GenerationTarget,
    /// Consumer rate.
    pub dispatcher: RateSpec,
    /// Channel capacity.
    pub capacity: usize,
}

impl ValidatedConfig {
    /// Switches the producer to run until it is stopped.
    pub fn unbounded(mut self) -> Self {
        self.target = GenerationTarget::Unbounded;
        self
    }
}
