use crate::domain::MeterEvent;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What caused a batch to be cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchType {
    SizeBased,
    TimeBased,
    Drain,
}

#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    events: Vec<MeterEvent>,
    batch_type: BatchType,
    created_at: Instant,
}

impl Batch {
    pub fn new(events: Vec<MeterEvent>, batch_type: BatchType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
            batch_type,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[MeterEvent] {
        &self.events
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    /// Time since the batch was cut.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Pending buffer owned by the collector loop.
///
/// Not synchronized: exactly one task pushes into it and cuts batches from
/// it. Batches never exceed `max_size` and are never empty.
#[derive(Debug)]
pub struct BatchFormer {
    pending: Vec<MeterEvent>,
    max_size: usize,
}

impl BatchFormer {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            pending: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Appends an event, returning a full size-based batch once the buffer
    /// reaches its limit.
    pub fn push(&mut self, event: MeterEvent) -> Option<Batch> {
        self.push_as(event, BatchType::SizeBased)
    }

    /// Like `push`, but labels a full batch with the given type.
    pub fn push_as(&mut self, event: MeterEvent, batch_type: BatchType) -> Option<Batch> {
        self.pending.push(event);
        if self.pending.len() >= self.max_size {
            self.take(batch_type)
        } else {
            None
        }
    }

    /// Cuts whatever is pending into a batch. `None` when nothing is buffered.
    pub fn take(&mut self, batch_type: BatchType) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        let events = std::mem::replace(&mut self.pending, Vec::with_capacity(self.max_size));
        Some(Batch::new(events, batch_type))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> MeterEvent {
        MeterEvent::new("api-calls", format!("customer-{n}"), n as f64, n + 1)
    }

    #[test]
    fn test_push_cuts_batch_at_max_size() {
        let mut former = BatchFormer::new(3);

        assert!(former.push(event(1)).is_none());
        assert!(former.push(event(2)).is_none());
        let batch = former.push(event(3)).expect("third event fills the batch");

        assert_eq!(batch.size(), 3);
        assert_eq!(batch.batch_type(), BatchType::SizeBased);
        let customers: Vec<_> = batch.events().iter().map(|e| e.customer_id.as_str()).collect();
        assert_eq!(customers, ["customer-1", "customer-2", "customer-3"]);
        assert!(former.is_empty());

        assert!(former.push(event(4)).is_none());
        assert_eq!(former.len(), 1);
    }

    #[test]
    fn test_take_on_empty_buffer_yields_nothing() {
        let mut former = BatchFormer::new(10);
        assert!(former.take(BatchType::TimeBased).is_none());
    }

    #[test]
    fn test_take_drains_partial_buffer() {
        let mut former = BatchFormer::new(10);
        former.push(event(1));
        former.push(event(2));

        let batch = former.take(BatchType::TimeBased).unwrap();
        assert_eq!(batch.size(), 2);
        assert_eq!(batch.batch_type(), BatchType::TimeBased);
        assert!(former.is_empty());
    }

    #[test]
    fn test_zero_max_size_is_clamped() {
        let mut former = BatchFormer::new(0);
        assert_eq!(former.max_size(), 1);
        assert_eq!(former.push(event(1)).map(|b| b.size()), Some(1));
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let a = Batch::new(vec![event(1)], BatchType::Drain);
        let b = Batch::new(vec![event(1)], BatchType::Drain);
        assert_ne!(a.id(), b.id());
    }
}
