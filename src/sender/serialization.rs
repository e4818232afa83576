use crate::buffer::Batch;
use crate::domain::MeterEvent;
use bytes::Bytes;
use thiserror::Error;

// Rough per-event size used to pre-size the output buffer
const ESTIMATED_EVENT_SIZE: usize = 256;
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

/// Encodes a batch as the JSON array the ingest API accepts.
#[derive(Debug, Clone, Default)]
pub struct BatchSerializer;

impl BatchSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, batch: &Batch) -> Result<Bytes, SerializationError> {
        if batch.is_empty() {
            return Err(SerializationError::EmptyBatch);
        }

        let capacity = batch
            .size()
            .saturating_mul(ESTIMATED_EVENT_SIZE)
            .min(MAX_PREALLOCATION);
        let mut buffer = Vec::with_capacity(capacity);
        serde_json::to_writer(&mut buffer, batch.events())?;
        Ok(Bytes::from(buffer))
    }

    pub fn deserialize(&self, payload: &[u8]) -> Result<Vec<MeterEvent>, SerializationError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
