use super::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One metering observation, as accepted by the ingest API.
///
/// Producers fill in the public fields. `message_id` and `enqueued_at` are
/// stamped by the pipeline when the event is first queued and never change
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterEvent {
    #[serde(default)]
    pub unique_id: String,
    pub meter_api_name: String,
    #[serde(default)]
    pub customer_id: String,
    pub meter_value: f64,
    pub meter_time_in_millis: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub dimensions: HashMap<String, String>,

    /// Sent on the wire as `messageId` so the server can drop duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    /// Sent on the wire as `enqueuedAt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enqueued_at: Option<String>,
}

impl MeterEvent {
    pub fn new(
        meter_api_name: impl Into<String>,
        customer_id: impl Into<String>,
        meter_value: f64,
        meter_time_in_millis: i64,
    ) -> Self {
        Self {
            unique_id: String::new(),
            meter_api_name: meter_api_name.into(),
            customer_id: customer_id.into(),
            meter_value,
            meter_time_in_millis,
            dimensions: HashMap::new(),
            message_id: None,
            enqueued_at: None,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.meter_api_name.is_empty() {
            return Err(ValidationError::MissingApiName);
        }
        if self.meter_time_in_millis < 1 {
            return Err(ValidationError::InvalidTimestamp {
                millis: self.meter_time_in_millis,
            });
        }
        if !self.meter_value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                value: self.meter_value,
            });
        }
        Ok(())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn enqueued_at(&self) -> Option<&str> {
        self.enqueued_at.as_deref()
    }

    /// Sets the message id unless one is already present. Returns whether the
    /// value was taken.
    pub fn set_message_id(&mut self, message_id: impl Into<String>) -> bool {
        if self.message_id.is_some() {
            return false;
        }
        self.message_id = Some(message_id.into());
        true
    }

    /// Sets the enqueue timestamp unless one is already present.
    pub fn set_enqueued_at(&mut self, enqueued_at: impl Into<String>) -> bool {
        if self.enqueued_at.is_some() {
            return false;
        }
        self.enqueued_at = Some(enqueued_at.into());
        true
    }

    /// Decorates the event for queuing: fills a blank idempotency key and
    /// stamps the set-once metadata.
    pub(crate) fn prepare_for_queue(&mut self, now: DateTime<Utc>) {
        if self.unique_id.trim().is_empty() {
            self.unique_id = Uuid::new_v4().to_string();
        }
        self.set_message_id(Uuid::new_v4().to_string());
        self.set_enqueued_at(format_enqueued_at(now));
    }
}

/// Formats a timestamp the way the ingest API expects `enqueuedAt`.
pub fn format_enqueued_at(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%z").to_string()
}
