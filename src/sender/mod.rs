pub mod client;
pub mod dispatcher;
pub mod serialization;
pub mod stats;
pub mod transport;

pub use client::{ClientConfig, ClientError, DEFAULT_INGEST_ENDPOINT, HttpClient};
pub use dispatcher::{DeliveryError, DeliveryReport, DispatchError, Dispatcher};
pub use serialization::{BatchSerializer, SerializationError};
pub use stats::{DeliveryStats, StatsSnapshot};
pub use transport::{Transport, TransportError};
