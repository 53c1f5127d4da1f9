//! Orchestrator configuration
//!
//! Defines all configurable parameters for the orchestrator including
//! the runner binary, where temporary and durable files live, retention
//! limits and streaming intervals.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use barrage_core::timeseries::DEFAULT_MAX_POINTS;

/// Result store backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// One JSON file per run in `results_dir`
    File,
    /// Bounded in-memory table, lost on restart
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown store backend '{}' (expected file or memory)", other),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Runner executable, invoked as `<runner> [args..] run --summary-export <path> <script>`
    pub runner_command: String,

    /// Extra arguments placed before `run`
    pub runner_args: Vec<String>,

    /// Directory for per-run script and summary files
    pub work_dir: PathBuf,

    pub store_backend: StoreBackend,

    /// Directory holding one result file per run (file backend only)
    pub results_dir: PathBuf,

    /// Maximum number of stored results kept after each write
    pub max_results: usize,

    /// Maximum stored results per script, 0 disables pruning
    pub max_runs_per_script: usize,

    /// Points kept in a stored time series
    pub timeseries_max_points: usize,

    /// Per-run broadcast capacity before slow observers start lagging
    pub log_channel_capacity: usize,

    /// Idle keep-alive interval on log streams
    pub heartbeat_interval: Duration,

    /// How long output readers may keep running after the process exited
    ///
    /// Descendants of the runner can hold its pipes open; their output is
    /// dropped once this expires.
    pub output_drain_timeout: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - BARRAGE_BIND_ADDR (default: 0.0.0.0:8080)
    /// - BARRAGE_RUNNER (default: k6)
    /// - BARRAGE_RUNNER_ARGS (whitespace separated, default: none)
    /// - BARRAGE_WORK_DIR (default: $TMPDIR/barrage)
    /// - BARRAGE_STORE (file | memory, default: file)
    /// - BARRAGE_RESULTS_DIR (default: ./results)
    /// - BARRAGE_MAX_RESULTS (default: 500)
    /// - BARRAGE_MAX_RUNS_PER_SCRIPT (default: 50)
    /// - BARRAGE_TIMESERIES_POINTS (default: 100)
    /// - BARRAGE_LOG_CHANNEL_CAPACITY (default: 1024)
    /// - BARRAGE_HEARTBEAT_SECS (default: 30)
    /// - BARRAGE_OUTPUT_DRAIN_MS (default: 2000)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let runner_args = match std::env::var("BARRAGE_RUNNER_ARGS") {
            Ok(args) => args.split_whitespace().map(str::to_string).collect(),
            Err(_) => defaults.runner_args,
        };

        Ok(Self {
            bind_addr: env_or("BARRAGE_BIND_ADDR", defaults.bind_addr),
            runner_command: env_or("BARRAGE_RUNNER", defaults.runner_command),
            runner_args,
            work_dir: std::env::var("BARRAGE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            store_backend: env_parse("BARRAGE_STORE", defaults.store_backend)?,
            results_dir: std::env::var("BARRAGE_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            max_results: env_parse("BARRAGE_MAX_RESULTS", defaults.max_results)?,
            max_runs_per_script: env_parse(
                "BARRAGE_MAX_RUNS_PER_SCRIPT",
                defaults.max_runs_per_script,
            )?,
            timeseries_max_points: env_parse(
                "BARRAGE_TIMESERIES_POINTS",
                defaults.timeseries_max_points,
            )?,
            log_channel_capacity: env_parse(
                "BARRAGE_LOG_CHANNEL_CAPACITY",
                defaults.log_channel_capacity,
            )?,
            heartbeat_interval: Duration::from_secs(env_parse(
                "BARRAGE_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            output_drain_timeout: Duration::from_millis(env_parse(
                "BARRAGE_OUTPUT_DRAIN_MS",
                defaults.output_drain_timeout.as_millis() as u64,
            )?),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.runner_command.trim().is_empty() {
            anyhow::bail!("runner_command cannot be empty");
        }

        if self.max_results == 0 {
            anyhow::bail!("max_results must be greater than 0");
        }

        if self.timeseries_max_points == 0 {
            anyhow::bail!("timeseries_max_points must be greater than 0");
        }

        if self.log_channel_capacity == 0 {
            anyhow::bail!("log_channel_capacity must be greater than 0");
        }

        if self.heartbeat_interval.as_secs() == 0 {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            runner_command: "k6".to_string(),
            runner_args: Vec::new(),
            work_dir: std::env::temp_dir().join("barrage"),
            store_backend: StoreBackend::File,
            results_dir: PathBuf::from("results"),
            max_results: 500,
            max_runs_per_script: 50,
            timeseries_max_points: DEFAULT_MAX_POINTS,
            log_channel_capacity: 1024,
            heartbeat_interval: Duration::from_secs(30),
            output_drain_timeout: Duration::from_secs(2),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runner_command, "k6");
        assert_eq!(config.store_backend, StoreBackend::File);
        assert_eq!(config.timeseries_max_points, 100);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.runner_command = "  ".to_string();
        assert!(config.validate().is_err());

        config.runner_command = "k6".to_string();
        config.max_results = 0;
        assert!(config.validate().is_err());

        config.max_results = 10;
        config.log_channel_capacity = 0;
        assert!(config.validate().is_err());

        config.log_channel_capacity = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("file".parse::<StoreBackend>().unwrap(), StoreBackend::File);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }
}
