use std::time::Duration;
use thiserror::Error;

/// Reasons a meter event is refused before it enters the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("'meterApiName' is a required field")]
    MissingApiName,

    #[error("Invalid meterTimeInMillis {millis}: should be milliseconds in UTC")]
    InvalidTimestamp { millis: i64 },

    #[error("Invalid meterValue {value}: must be a finite number")]
    NonFiniteValue { value: f64 },
}

/// Top-level error type for the ingest pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid meter event: {0}")]
    Validation(#[from] ValidationError),

    #[error("Pipeline is shutting down; no further events are accepted")]
    ShuttingDown,

    #[error("No tokio runtime available to run the collector loop")]
    NoRuntime,

    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Failed to read input: {0}")]
    Input(#[from] std::io::Error),

    #[error("Collector task failed: {0}")]
    CollectorFailed(String),
}
