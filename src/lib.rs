#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_possible_truncation, // Counters and durations stay well inside u64
    clippy::cast_precision_loss,      // Test fixtures turn indices into meter values
    clippy::missing_errors_doc,       // Error enums document themselves
    clippy::module_name_repetitions,  // e.g. PipelineConfig in pipeline module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Field names in prose
)]

pub mod app;
pub mod buffer;
pub mod collector;
pub mod domain;
pub mod pipeline;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use domain::{IngestError, MeterEvent, ValidationError};
pub use pipeline::{MeteringPipeline, PipelineConfig, PipelineError, PipelineState};
pub use reliability::{BackoffPolicy, DeadLetter, DeadLetterSink};
pub use sender::{ClientConfig, HttpClient, StatsSnapshot, Transport, TransportError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
