pub mod backoff;
pub mod dead_letter;
pub mod permits;

pub use backoff::{BackoffError, BackoffPolicy, DEFAULT_BACKOFF_SCHEDULE_SECS};
pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use permits::{DeliveryPermit, DeliveryPermits, PermitError};
