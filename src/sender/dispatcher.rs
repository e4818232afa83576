use super::serialization::{BatchSerializer, SerializationError};
use super::stats::{DeliveryStats, StatsSnapshot};
use super::transport::{Transport, TransportError};
use crate::buffer::Batch;
use crate::pipeline::config::{PipelineConfig, attach_logger};
use crate::reliability::{BackoffPolicy, DeadLetter, DeadLetterSink, DeliveryPermits, PermitError};
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{Dispatch, Instrument, debug, error, info, info_span, warn};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] SerializationError),
    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Dispatcher is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub batch_id: String,
    pub events: usize,
    pub attempts: u32,
    pub latency: Duration,
    pub response: Bytes,
}

/// Bounded-concurrency retrying sender.
///
/// `dispatch` holds one permit per batch for the whole attempt series and
/// runs the attempts on a tracked task, so the caller only ever waits for a
/// free slot, never for the network.
pub struct Dispatcher<T: Transport> {
    inner: Arc<DispatcherInner<T>>,
}

struct DispatcherInner<T> {
    transport: T,
    serializer: BatchSerializer,
    backoff: BackoffPolicy,
    max_attempts: u32,
    permits: DeliveryPermits,
    tracker: TaskTracker,
    stats: Arc<DeliveryStats>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    debug: bool,
    logger: Option<Dispatch>,
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        transport: T,
        config: &PipelineConfig,
        stats: Arc<DeliveryStats>,
    ) -> Result<Self, PermitError> {
        let permits = DeliveryPermits::new(config.max_concurrent_deliveries)?;
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                transport,
                serializer: BatchSerializer::new(),
                backoff: config.backoff.clone(),
                max_attempts: config.max_retry_attempts.max(1),
                permits,
                tracker: TaskTracker::new(),
                stats,
                dead_letter: config.dead_letter.clone(),
                debug: config.debug,
                logger: config.logger.clone(),
            }),
        })
    }

    /// Hands a batch to a delivery task. Waits only while every permit is
    /// held. Empty batches are ignored.
    pub async fn dispatch(&self, batch: Batch) -> Result<(), DispatchError> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.inner.tracker.is_closed() {
            return Err(DispatchError::Closed);
        }

        let permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| DispatchError::Closed)?;
        self.inner.stats.record_dispatched();

        let span = info_span!(
            "delivery",
            batch_id = %batch.id(),
            events = batch.size(),
            trigger = ?batch.batch_type()
        );
        let dispatcher = self.clone();
        let task = async move {
            let _permit = permit;
            let events = batch.size();
            let outcome = AssertUnwindSafe(dispatcher.deliver_or_dead_letter(batch))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!(events, "Delivery task panicked, batch dropped");
                dispatcher.inner.stats.record_panic(events);
            }
        };

        self.inner.tracker.spawn(attach_logger(
            self.inner.logger.as_ref(),
            task.instrument(span),
        ));
        Ok(())
    }

    /// Runs the full attempt series for one batch on the current task.
    pub async fn deliver(&self, batch: &Batch) -> Result<DeliveryReport, DeliveryError> {
        let inner = &self.inner;
        let payload = inner.serializer.serialize(batch)?;
        if inner.debug {
            debug!(
                batch_id = %batch.id(),
                payload = %String::from_utf8_lossy(&payload),
                "Ingest API payload"
            );
        }

        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                info!(batch_id = %batch.id(), attempt, "Ingest API retry attempt");
                inner.stats.record_retry();
            }

            match inner.transport.send(payload.clone()).await {
                Ok(response) => {
                    return Ok(DeliveryReport {
                        batch_id: batch.id().to_string(),
                        events: batch.size(),
                        attempts: attempt + 1,
                        latency: start.elapsed(),
                        response,
                    });
                }
                Err(last_error) => {
                    attempt += 1;
                    if attempt >= inner.max_attempts {
                        return Err(DeliveryError::Exhausted {
                            attempts: attempt,
                            last_error,
                        });
                    }
                    let delay = inner.backoff.delay(attempt - 1);
                    warn!(
                        batch_id = %batch.id(),
                        attempt,
                        error = %last_error,
                        retry_in = ?delay,
                        "Ingest API call failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn deliver_or_dead_letter(&self, batch: Batch) {
        match self.deliver(&batch).await {
            Ok(report) => {
                info!(
                    batch_id = %report.batch_id,
                    events = report.events,
                    attempts = report.attempts,
                    latency = ?report.latency,
                    age = ?batch.age(),
                    "Delivered batch"
                );
                self.inner.stats.record_delivered(report.events);
            }
            Err(error) => {
                let events = batch.size();
                error!(
                    batch_id = %batch.id(),
                    events,
                    age = ?batch.age(),
                    error = %error,
                    "Giving up on batch"
                );
                if let Some(sink) = &self.inner.dead_letter {
                    sink.on_exhausted(DeadLetter { batch, error });
                }
                self.inner.stats.record_failed(events);
            }
        }
    }

    /// Stops accepting batches and waits until every spawned delivery has
    /// finished, successfully or not.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Deliveries spawned and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn permits(&self) -> &DeliveryPermits {
        &self.inner.permits
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(
            self.inner.permits.in_flight(),
            self.inner.permits.peak_in_flight(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchType;
    use crate::domain::MeterEvent;
    use crate::reliability::dead_letter::MockDeadLetterSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for FlakyTransport {
        async fn send(&self, _payload: Bytes) -> Result<Bytes, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TransportError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(Bytes::from_static(b"{\"ok\":true}"))
            }
        }
    }

    struct PanickingTransport;

    impl Transport for PanickingTransport {
        async fn send(&self, _payload: Bytes) -> Result<Bytes, TransportError> {
            panic!("transport fault");
        }
    }

    fn batch(events: usize) -> Batch {
        let events = (0..events)
            .map(|n| MeterEvent::new("api-calls", "customer", n as f64, 1_700_000_000_000))
            .collect();
        Batch::new(events, BatchType::SizeBased)
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::new()
            .with_max_retry_attempts(3)
            .with_backoff(BackoffPolicy::from_millis(&[1, 2]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_default_backoff_until_success() {
        let transport = Arc::new(FlakyTransport::new(2));
        let dispatcher =
            Dispatcher::new(transport.clone(), &PipelineConfig::default(), Arc::default()).unwrap();

        let report = dispatcher.deliver(&batch(4)).await.unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.events, 4);
        assert_eq!(report.response, Bytes::from_static(b"{\"ok\":true}"));
        assert_eq!(transport.calls(), 3);
        assert_eq!(dispatcher.stats().retry_attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let dispatcher = Dispatcher::new(transport.clone(), &fast_config(), Arc::default()).unwrap();

        let err = dispatcher.deliver(&batch(1)).await.unwrap_err();

        match err {
            DeliveryError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last_error, TransportError::Status { status: 503, .. }));
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_configuration_never_retries() {
        let transport = Arc::new(FlakyTransport::new(1));
        let config = fast_config().with_max_retry_attempts(1);
        let dispatcher = Dispatcher::new(transport.clone(), &config, Arc::default()).unwrap();

        assert!(dispatcher.deliver(&batch(1)).await.is_err());
        assert_eq!(transport.calls(), 1);
        assert_eq!(dispatcher.stats().retry_attempts, 0);
    }

    #[tokio::test]
    async fn test_dispatch_releases_permit_after_success() {
        let transport = Arc::new(FlakyTransport::new(0));
        let dispatcher = Dispatcher::new(transport.clone(), &fast_config(), Arc::default()).unwrap();

        dispatcher.dispatch(batch(2)).await.unwrap();
        dispatcher.wait_idle().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.batches_dispatched, 1);
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.events_delivered, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(dispatcher.permits().available(), dispatcher.permits().capacity());
    }

    #[tokio::test]
    async fn test_exhausted_batch_goes_to_dead_letter_sink() {
        let mut sink = MockDeadLetterSink::new();
        sink.expect_on_exhausted()
            .times(1)
            .withf(|dead| {
                dead.batch.size() == 2
                    && matches!(dead.error, DeliveryError::Exhausted { attempts: 3, .. })
            })
            .return_const(());

        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let config = fast_config().with_dead_letter(Arc::new(sink));
        let dispatcher = Dispatcher::new(transport, &config, Arc::default()).unwrap();

        dispatcher.dispatch(batch(2)).await.unwrap();
        dispatcher.wait_idle().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.events_dropped, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_final_failure_is_logged() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let dispatcher = Dispatcher::new(transport, &fast_config(), Arc::default()).unwrap();

        dispatcher.deliver_or_dead_letter(batch(1)).await;

        assert!(logs_contain("Ingest API retry attempt"));
        assert!(logs_contain("Giving up on batch"));
        assert!(logs_contain("age="));
    }

    #[tokio::test]
    async fn test_panicking_transport_still_releases_permit() {
        let dispatcher = Dispatcher::new(PanickingTransport, &fast_config(), Arc::default()).unwrap();

        dispatcher.dispatch(batch(3)).await.unwrap();
        dispatcher.wait_idle().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.delivery_panics, 1);
        assert_eq!(stats.events_dropped, 3);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(dispatcher.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_dispatched() {
        let transport = Arc::new(FlakyTransport::new(0));
        let dispatcher = Dispatcher::new(transport.clone(), &fast_config(), Arc::default()).unwrap();

        dispatcher
            .dispatch(Batch::new(Vec::new(), BatchType::TimeBased))
            .await
            .unwrap();
        dispatcher.wait_idle().await;

        assert_eq!(transport.calls(), 0);
        assert_eq!(dispatcher.stats().batches_dispatched, 0);
    }

    #[tokio::test]
    async fn test_dispatch_after_wait_idle_is_refused() {
        let dispatcher =
            Dispatcher::new(Arc::new(FlakyTransport::new(0)), &fast_config(), Arc::default()).unwrap();
        dispatcher.wait_idle().await;

        assert_eq!(
            dispatcher.dispatch(batch(1)).await,
            Err(DispatchError::Closed)
        );
    }
}
