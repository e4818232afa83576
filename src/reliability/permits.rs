// Bounded delivery gate
//
// Caps the number of batches in flight. Acquiring a permit suspends the
// caller while the gate is full; dropping the permit frees the slot and wakes
// the next waiter in FIFO order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PermitError {
    #[error("Delivery gate is closed")]
    Closed,
    #[error("Invalid delivery concurrency: {0}")]
    InvalidCapacity(usize),
}

#[derive(Debug, Clone)]
pub struct DeliveryPermits {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// A held delivery slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct DeliveryPermit {
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for DeliveryPermit {
    fn drop(&mut self) {
        // runs before `_permit` is dropped, so in_flight never exceeds capacity
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DeliveryPermits {
    pub fn new(capacity: usize) -> Result<Self, PermitError> {
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(PermitError::InvalidCapacity(capacity));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub async fn acquire(&self) -> Result<DeliveryPermit, PermitError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PermitError::Closed)?;
        Ok(self.track(permit))
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> DeliveryPermit {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        DeliveryPermit {
            in_flight: self.in_flight.clone(),
            _permit: permit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of permits held at the same time so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}
