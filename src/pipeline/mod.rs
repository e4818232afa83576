pub mod config;

pub use config::{
    ConfigError, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_DELIVERIES,
    DEFAULT_MAX_RETRY_ATTEMPTS, PipelineConfig,
};

use crate::collector::Collector;
use crate::domain::{IngestError, MeterEvent};
use crate::sender::{
    ClientConfig, ClientError, DeliveryStats, Dispatcher, HttpClient, StatsSnapshot, Transport,
};
use chrono::Utc;
use config::attach_logger;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build ingest client: {0}")]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// Process-local batching front end for the ingest API.
///
/// Cloning is cheap and every clone feeds the same collector. The collector
/// starts on the first `meter` (or an explicit `start`) and stops for good on
/// `shutdown`, or when the last clone is dropped.
pub struct MeteringPipeline<T: Transport = HttpClient> {
    inner: Arc<Shared<T>>,
}

struct Shared<T: Transport> {
    config: PipelineConfig,
    dispatcher: Dispatcher<T>,
    stats: Arc<DeliveryStats>,
    state: Arc<watch::Sender<PipelineState>>,
    control: Mutex<Control>,
    failure: Arc<Mutex<Option<String>>>,
}

struct Control {
    sender: Option<mpsc::Sender<MeterEvent>>,
    shutdown: CancellationToken,
}

impl<T: Transport> Clone for MeteringPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MeteringPipeline<HttpClient> {
    pub fn new(client: ClientConfig, config: PipelineConfig) -> Result<Self, PipelineError> {
        let transport = HttpClient::new(client)?;
        Ok(Self::with_transport(transport, config)?)
    }
}

impl<T: Transport> MeteringPipeline<T> {
    pub fn with_transport(transport: T, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = Arc::new(DeliveryStats::new());
        let dispatcher = Dispatcher::new(transport, &config, Arc::clone(&stats))?;
        let (state, _) = watch::channel(PipelineState::NotStarted);

        Ok(Self {
            inner: Arc::new(Shared {
                config,
                dispatcher,
                stats,
                state: Arc::new(state),
                control: Mutex::new(Control {
                    sender: None,
                    shutdown: CancellationToken::new(),
                }),
                failure: Arc::new(Mutex::new(None)),
            }),
        })
    }

    /// Starts the collector. Does nothing when it is already running.
    pub fn start(&self) -> Result<(), IngestError> {
        let mut control = self.inner.control.lock();
        self.start_locked(&mut control)
    }

    fn start_locked(&self, control: &mut Control) -> Result<(), IngestError> {
        let state = *self.inner.state.borrow();
        match state {
            PipelineState::Running => return Ok(()),
            PipelineState::Draining | PipelineState::Stopped => {
                return Err(IngestError::ShuttingDown);
            }
            PipelineState::NotStarted => {}
        }

        let runtime = Handle::try_current().map_err(|_| IngestError::NoRuntime)?;
        let config = &self.inner.config;
        let (tx, rx) = mpsc::channel(config.max_batch_size);
        let collector = Collector::new(
            rx,
            self.inner.dispatcher.clone(),
            config.max_batch_size,
            config.flush_interval,
            control.shutdown.clone(),
            config.debug,
        );
        let handle = runtime.spawn(attach_logger(config.logger.as_ref(), collector.run()));
        runtime.spawn(attach_logger(
            config.logger.as_ref(),
            watch_collector(
                handle,
                Arc::clone(&self.inner.state),
                Arc::clone(&self.inner.failure),
            ),
        ));

        control.sender = Some(tx);
        self.inner.state.send_replace(PipelineState::Running);
        Ok(())
    }

    /// Queues one event, starting the collector if needed.
    ///
    /// Suspends while the queue is full. Blank `uniqueId`s are filled in and
    /// `messageId`/`enqueuedAt` are stamped here, once.
    pub async fn meter(&self, event: MeterEvent) -> Result<(), IngestError> {
        attach_logger(self.inner.config.logger.as_ref(), self.enqueue(event)).await
    }

    async fn enqueue(&self, mut event: MeterEvent) -> Result<(), IngestError> {
        event.validate()?;

        let sender = {
            let mut control = self.inner.control.lock();
            self.start_locked(&mut control)?;
            control.sender.clone().ok_or(IngestError::ShuttingDown)?
        };

        event.prepare_for_queue(Utc::now());
        sender.send(event).await.map_err(|_| {
            IngestError::CollectorFailed("collector stopped receiving events".to_string())
        })?;
        self.inner.stats.record_accepted();
        Ok(())
    }

    /// Stops intake, flushes everything already accepted and waits for the
    /// deliveries to finish. Safe to call any number of times.
    pub async fn shutdown(&self) -> Result<(), IngestError> {
        attach_logger(self.inner.config.logger.as_ref(), self.stop()).await
    }

    async fn stop(&self) -> Result<(), IngestError> {
        {
            let mut control = self.inner.control.lock();
            let state = *self.inner.state.borrow();
            match state {
                PipelineState::NotStarted => {
                    self.inner.state.send_replace(PipelineState::Stopped);
                    info!("Pipeline stopped before it was started");
                    return Ok(());
                }
                PipelineState::Running => {
                    info!("Shutting down metering pipeline");
                    self.inner.state.send_replace(PipelineState::Draining);
                    control.sender = None;
                    control.shutdown.cancel();
                }
                PipelineState::Draining | PipelineState::Stopped => {
                    debug!(state = ?state, "Shutdown already in progress");
                }
            }
        }

        self.wait_stopped().await?;
        match self.inner.failure.lock().clone() {
            Some(reason) => Err(IngestError::CollectorFailed(reason)),
            None => Ok(()),
        }
    }

    async fn wait_stopped(&self) -> Result<(), IngestError> {
        let mut state = self.inner.state.subscribe();
        let stopped = async move {
            state
                .wait_for(|s| *s == PipelineState::Stopped)
                .await
                .map(|_| ())
                .map_err(|_| IngestError::CollectorFailed("state channel closed".to_string()))
        };

        match self.inner.config.drain_timeout {
            Some(limit) => tokio::time::timeout(limit, stopped)
                .await
                .map_err(|_| IngestError::ShutdownTimeout(limit))?,
            None => stopped.await,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.borrow()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.dispatcher.stats()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }
}

/// Marks the pipeline stopped once the collector task ends, however it ends.
async fn watch_collector(
    handle: JoinHandle<()>,
    state: Arc<watch::Sender<PipelineState>>,
    failure: Arc<Mutex<Option<String>>>,
) {
    if let Err(e) = handle.await {
        error!(error = %e, "Collector task failed");
        *failure.lock() = Some(e.to_string());
    }
    state.send_replace(PipelineState::Stopped);
    info!("Metering pipeline stopped");
}
