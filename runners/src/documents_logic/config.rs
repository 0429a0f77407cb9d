use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lib_reqflow::{PipelineConfig, RateConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "run_documents.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Rate-limited document request pipeline", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "REQFLOW_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REQFLOW_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REQFLOW_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REQFLOW_GENERATOR_LIMIT", help = "Documents generated per time unit.")]
    pub generator_limit: Option<i64>,

    #[clap(long, env = "REQFLOW_GENERATOR_UNIT", help = "Time unit of the generator rate (e.g. seconds, minutes).")]
    pub generator_unit: Option<String>,

    #[clap(long, env = "REQFLOW_DOCUMENT_COUNT", help = "Number of documents to generate, [1, 10000].")]
    pub document_count: Option<i64>,

    #[clap(long, env = "REQFLOW_UNBOUNDED", help = "Generate documents until Ctrl-C instead of a fixed count.")]
    pub unbounded: Option<bool>,

    #[clap(long, env = "REQFLOW_DISPATCHER_LIMIT", help = "Requests sent per time unit.")]
    pub dispatcher_limit: Option<i64>,

    #[clap(long, env = "REQFLOW_DISPATCHER_UNIT", help = "Time unit of the dispatcher rate.")]
    pub dispatcher_unit: Option<String>,

    #[clap(long, env = "REQFLOW_CAPACITY", help = "Capacity of the queue between generator and dispatcher.")]
    pub capacity: Option<i64>,

    #[clap(long, env = "REQFLOW_ENDPOINT", help = "Base URL of the remote API. Without it requests are simulated.")]
    pub endpoint: Option<String>,

    #[clap(long, env = "REQFLOW_ENDPOINT_PATH", help = "Path the documents are posted to, relative to the endpoint.")]
    pub endpoint_path: Option<String>,

    #[clap(long, env = "REQFLOW_AUTH_TOKEN", help = "Bearer token for the remote API.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "REQFLOW_EXPECTED_STATUS", help = "HTTP status that counts as an accepted document.")]
    pub expected_status: Option<u16>,

    #[clap(long, env = "REQFLOW_MAX_RETRIES", help = "Retries for transient HTTP failures.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "REQFLOW_SIMULATED_REJECT_RATIO", help = "Share of simulated requests that are rejected, [0, 1].")]
    pub simulated_reject_ratio: Option<f64>,

    #[clap(long, env = "REQFLOW_SIMULATED_LATENCY_MS", help = "Latency of a simulated request in milliseconds.")]
    pub simulated_latency_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            generator_limit: other.generator_limit.or(self.generator_limit),
            generator_unit: other.generator_unit.or(self.generator_unit),
            document_count: other.document_count.or(self.document_count),
            unbounded: other.unbounded.or(self.unbounded),
            dispatcher_limit: other.dispatcher_limit.or(self.dispatcher_limit),
            dispatcher_unit: other.dispatcher_unit.or(self.dispatcher_unit),
            capacity: other.capacity.or(self.capacity),
            endpoint: other.endpoint.or(self.endpoint),
            endpoint_path: other.endpoint_path.or(self.endpoint_path),
            auth_token: other.auth_token.or(self.auth_token),
            expected_status: other.expected_status.or(self.expected_status),
            max_retries: other.max_retries.or(self.max_retries),
            simulated_reject_ratio: other.simulated_reject_ratio.or(self.simulated_reject_ratio),
            simulated_latency_ms: other.simulated_latency_ms.or(self.simulated_latency_ms),
        }
    }

    fn defaults() -> Config {
        let pipeline = PipelineConfig::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            generator_limit: Some(pipeline.generator.limit),
            generator_unit: Some(pipeline.generator.unit),
            document_count: Some(pipeline.generator_count),
            unbounded: Some(false),
            dispatcher_limit: Some(pipeline.dispatcher.limit),
            dispatcher_unit: Some(pipeline.dispatcher.unit),
            capacity: Some(pipeline.capacity),
            endpoint_path: Some("documents/create".to_string()),
            expected_status: Some(201),
            max_retries: Some(3),
            simulated_reject_ratio: Some(0.0),
            simulated_latency_ms: Some(50),
            ..Default::default()
        }
    }

    /// The raw pipeline settings; validation happens in the library.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            generator: RateConfig {
                limit: self.generator_limit.unwrap_or(defaults.generator.limit),
                unit: self.generator_unit.clone().unwrap_or(defaults.generator.unit),
            },
            generator_count: self.document_count.unwrap_or(defaults.generator_count),
            dispatcher: RateConfig {
                limit: self.dispatcher_limit.unwrap_or(defaults.dispatcher.limit),
                unit: self.dispatcher_unit.clone().unwrap_or(defaults.dispatcher.unit),
            },
            capacity: self.capacity.unwrap_or(defaults.capacity),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config
    Generator: {:?} per {:?}, documents: {:?}, unbounded: {:?},
    Dispatcher: {:?} per {:?},
    Capacity: {:?},
    Endpoint: {} (path {:?}, expected status {:?}, retries {:?}),
    Simulation: reject ratio {:?}, latency {:?} ms
",
            self.generator_limit,
            self.generator_unit,
            self.document_count,
            self.unbounded,
            self.dispatcher_limit,
            self.dispatcher_unit,
            self.capacity,
            self.endpoint.as_deref().unwrap_or("<simulated>"),
            self.endpoint_path,
            self.expected_status,
            self.max_retries,
            self.simulated_reject_ratio,
            self.simulated_latency_ms
        )
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Layers defaults, then the JSON file, then `cli` (which already carries the
/// environment variables).
pub fn resolve_config(cli: Config) -> Result<Config> {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        current_config = current_config.merge(read_config_file(&config_file_path)?);
    } else if cli.config_path.is_some() {
        anyhow::bail!("config file not found at {}", config_file_path.display());
    }

    Ok(current_config.merge(cli))
}

pub fn load_config() -> Result<Config> {
    resolve_config(Config::parse())
}
