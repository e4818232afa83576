use crate::reliability::{BackoffPolicy, DeadLetterSink, PermitError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Dispatch;
use tracing::instrument::{WithDispatch, WithSubscriber};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 6;
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Flush interval must be greater than zero")]
    ZeroFlushInterval,
    #[error("Max batch size must be at least 1")]
    ZeroBatchSize,
    #[error("Max retry attempts must be at least 1")]
    ZeroRetryAttempts,
    #[error("Invalid delivery concurrency: {0}")]
    Permits(#[from] PermitError),
}

/// Immutable settings for one pipeline instance.
///
/// Built with the `with_*` methods, validated once when the pipeline is
/// created and never changed afterwards.
#[derive(Clone)]
pub struct PipelineConfig {
    pub flush_interval: Duration,
    pub max_batch_size: usize,
    pub max_retry_attempts: u32,
    pub max_concurrent_deliveries: usize,
    pub debug: bool,
    pub backoff: BackoffPolicy,
    /// Upper bound on how long `shutdown` waits for the drain. `None` waits
    /// for as long as delivery takes.
    pub drain_timeout: Option<Duration>,
    pub logger: Option<Dispatch>,
    pub dead_letter: Option<Arc<dyn DeadLetterSink>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            debug: false,
            backoff: BackoffPolicy::default(),
            drain_timeout: None,
            logger: None,
            dead_letter: None,
        }
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("flush_interval", &self.flush_interval)
            .field("max_batch_size", &self.max_batch_size)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .field("debug", &self.debug)
            .field("backoff", &self.backoff)
            .field("drain_timeout", &self.drain_timeout)
            .field("custom_logger", &self.logger.is_some())
            .field("dead_letter", &self.dead_letter.is_some())
            .finish()
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_max_concurrent_deliveries(mut self, max: usize) -> Self {
        self.max_concurrent_deliveries = max;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Routes every log line the pipeline emits to `logger` instead of the
    /// global subscriber.
    pub fn with_logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.max_concurrent_deliveries == 0
            || self.max_concurrent_deliveries > tokio::sync::Semaphore::MAX_PERMITS
        {
            return Err(PermitError::InvalidCapacity(self.max_concurrent_deliveries).into());
        }
        Ok(())
    }
}

/// Runs `fut` under the custom logger when one is configured, otherwise under
/// whatever subscriber is current at the call site.
pub(crate) fn attach_logger<F: Future>(logger: Option<&Dispatch>, fut: F) -> WithDispatch<F> {
    match logger {
        Some(dispatch) => fut.with_subscriber(dispatch.clone()),
        None => fut.with_current_subscriber(),
    }
}
