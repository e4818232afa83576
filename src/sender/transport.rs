use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A single failed delivery attempt. Every variant is retried by the
/// dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Sends one serialized batch to the ingest endpoint.
///
/// Implementations classify the outcome only: success carries the raw
/// response body, anything else is a `TransportError`. Retrying is the
/// dispatcher's job.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, payload: Bytes) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, payload: Bytes) -> impl Future<Output = Result<Bytes, TransportError>> + Send {
        (**self).send(payload)
    }
}
