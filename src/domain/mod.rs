//! Domain layer for meter-ingest.
//!
//! Contains the canonical types shared across all modules:
//! - `MeterEvent`: The pipeline's core data type
//! - `ValidationError`: Why an event was refused at enqueue time
//! - `IngestError`: Top-level error type returned to producers

pub mod error;
pub mod meter_event;

pub use error::{IngestError, ValidationError};
pub use meter_event::{MeterEvent, format_enqueued_at};
