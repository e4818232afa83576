use super::{AppConfigError, LogFormat, LogLevel};
use crate::reliability::DEFAULT_BACKOFF_SCHEDULE_SECS;
use crate::sender::DEFAULT_INGEST_ENDPOINT;
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Clone)]
#[command(name = "meter-forwarder", author, version, about, long_about = None)]
pub struct Config {
    /// Ingest API base URL; batches are posted to `<endpoint>/ingest`
    #[arg(long, env = "INGEST_ENDPOINT", default_value = DEFAULT_INGEST_ENDPOINT)]
    pub endpoint: String,

    /// API key sent in the X-API-KEY header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Maximum number of events per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "100")]
    pub batch_size: usize,

    /// Flush interval in milliseconds
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value = "1000")]
    pub flush_interval_ms: u64,

    /// Delivery attempts per batch, the first one included
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value = "6")]
    pub max_retry_attempts: u32,

    /// Upper bound on batches being delivered at once
    #[arg(long, env = "MAX_CONCURRENT_DELIVERIES", default_value = "1000")]
    pub max_concurrent_deliveries: usize,

    /// Comma separated backoff ceilings in seconds, indexed by attempt
    #[arg(
        long,
        env = "BACKOFF_SCHEDULE_SECS",
        value_delimiter = ',',
        default_value = "2,6,12,20,40,80"
    )]
    pub backoff_schedule_secs: Vec<u64>,

    /// Give up waiting for the shutdown drain after this many seconds
    #[arg(long, env = "DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: Option<u64>,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Gzip request bodies
    #[arg(long, env = "ENABLE_COMPRESSION")]
    pub enable_compression: bool,

    /// Log queued events, empty ticks and payloads
    #[arg(long, env = "DEBUG_LOGGING")]
    pub debug_logging: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Read newline-delimited JSON events from this file instead of stdin
    #[arg(long, env = "INPUT_FILE")]
    pub input_file: Option<PathBuf>,

    /// TOML configuration file; command line and environment take precedence
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// Settings accepted from the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub max_retry_attempts: Option<u32>,
    pub max_concurrent_deliveries: Option<usize>,
    pub backoff_schedule_secs: Option<Vec<u64>>,
    pub drain_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub enable_compression: Option<bool>,
    pub debug_logging: Option<bool>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
    pub input_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INGEST_ENDPOINT.to_string(),
            api_key: None,
            batch_size: 100,
            flush_interval_ms: 1000,
            max_retry_attempts: 6,
            max_concurrent_deliveries: 1000,
            backoff_schedule_secs: DEFAULT_BACKOFF_SCHEDULE_SECS.to_vec(),
            drain_timeout_secs: None,
            request_timeout_secs: 30,
            enable_compression: false,
            debug_logging: false,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            input_file: None,
            config_file: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("batch_size", &self.batch_size)
            .field("flush_interval_ms", &self.flush_interval_ms)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .field("backoff_schedule_secs", &self.backoff_schedule_secs)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("enable_compression", &self.enable_compression)
            .field("debug_logging", &self.debug_logging)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("input_file", &self.input_file)
            .field("config_file", &self.config_file)
            .finish()
    }
}

impl Config {
    /// Parses arguments and environment, layers the config file underneath
    /// when one is named, then validates.
    ///
    /// Precedence: command line, environment, config file, built-in default.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, AppConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut config = Self::from_arg_matches(&matches)?;

        if let Some(path) = config.config_file.clone() {
            let file = FileConfig::load(&path)?;
            config.merge_file(file, |id| set_explicitly(&matches, id));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppConfigError> {
        let path = path.as_ref();
        let mut config = Config {
            config_file: Some(path.to_path_buf()),
            ..Config::default()
        };
        config.merge_file(FileConfig::load(path)?, |_| false);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, file: FileConfig, explicit: impl Fn(&str) -> bool) {
        fill(&mut self.endpoint, file.endpoint, explicit("endpoint"));
        fill_opt(&mut self.api_key, file.api_key, explicit("api_key"));
        fill(&mut self.batch_size, file.batch_size, explicit("batch_size"));
        fill(
            &mut self.flush_interval_ms,
            file.flush_interval_ms,
            explicit("flush_interval_ms"),
        );
        fill(
            &mut self.max_retry_attempts,
            file.max_retry_attempts,
            explicit("max_retry_attempts"),
        );
        fill(
            &mut self.max_concurrent_deliveries,
            file.max_concurrent_deliveries,
            explicit("max_concurrent_deliveries"),
        );
        fill(
            &mut self.backoff_schedule_secs,
            file.backoff_schedule_secs,
            explicit("backoff_schedule_secs"),
        );
        fill_opt(
            &mut self.drain_timeout_secs,
            file.drain_timeout_secs,
            explicit("drain_timeout_secs"),
        );
        fill(
            &mut self.request_timeout_secs,
            file.request_timeout_secs,
            explicit("request_timeout_secs"),
        );
        fill(
            &mut self.enable_compression,
            file.enable_compression,
            explicit("enable_compression"),
        );
        fill(
            &mut self.debug_logging,
            file.debug_logging,
            explicit("debug_logging"),
        );
        fill(&mut self.log_level, file.log_level, explicit("log_level"));
        fill(&mut self.log_format, file.log_format, explicit("log_format"));
        fill_opt(&mut self.input_file, file.input_file, explicit("input_file"));
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, AppConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| AppConfigError::FileError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}

/// True when the value came from the command line or the environment.
fn set_explicitly(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

fn fill<T>(target: &mut T, value: Option<T>, explicit: bool) {
    if let Some(value) = value
        && !explicit
    {
        *target = value;
    }
}

fn fill_opt<T>(target: &mut Option<T>, value: Option<T>, explicit: bool) {
    if value.is_some() && !explicit {
        *target = value;
    }
}
