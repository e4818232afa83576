//! Buffer owner and flush scheduler.
//!
//! The collector task is the only place events are batched. It reacts to
//! three sources: new events, the flush timer and the shutdown token.

use crate::buffer::{Batch, BatchFormer, BatchType};
use crate::domain::MeterEvent;
use crate::sender::{Dispatcher, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    ChannelClosed,
}

pub struct Collector<T: Transport> {
    events: mpsc::Receiver<MeterEvent>,
    former: BatchFormer,
    dispatcher: Dispatcher<T>,
    flush_interval: Duration,
    shutdown: CancellationToken,
    debug: bool,
}

impl<T: Transport> Collector<T> {
    pub fn new(
        events: mpsc::Receiver<MeterEvent>,
        dispatcher: Dispatcher<T>,
        max_batch_size: usize,
        flush_interval: Duration,
        shutdown: CancellationToken,
        debug: bool,
    ) -> Self {
        Self {
            events,
            former: BatchFormer::new(max_batch_size),
            dispatcher,
            flush_interval,
            shutdown,
            debug,
        }
    }

    /// Runs until the shutdown token fires or every sender is gone, then
    /// drains. Returns once all deliveries have finished.
    pub async fn run(mut self) {
        info!(
            batch_size = self.former.max_size(),
            flush_interval = ?self.flush_interval,
            "Starting ingest collector"
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                received = self.events.recv() => match received {
                    Some(event) => self.accept(event).await,
                    None => break StopReason::ChannelClosed,
                },
                _ = ticker.tick() => self.flush_on_tick().await,
                () = self.shutdown.cancelled() => break StopReason::Cancelled,
            }
        };

        info!(reason = ?reason, pending = self.former.len(), "Draining ingest queue");
        self.drain().await;
    }

    async fn accept(&mut self, event: MeterEvent) {
        if self.debug {
            debug!(
                meter = %event.meter_api_name,
                customer = %event.customer_id,
                queued = self.former.len() + 1,
                "Queued meter event"
            );
        }
        if let Some(batch) = self.former.push(event) {
            self.dispatch(batch).await;
        }
    }

    async fn flush_on_tick(&mut self) {
        match self.former.take(BatchType::TimeBased) {
            Some(batch) => self.dispatch(batch).await,
            None => {
                if self.debug {
                    debug!("Flush tick with empty queue");
                }
            }
        }
    }

    async fn drain(&mut self) {
        // Producers still blocked in `send` hold a sender clone, so this loop
        // ends only after their events are in.
        while let Some(event) = self.events.recv().await {
            if let Some(batch) = self.former.push_as(event, BatchType::Drain) {
                self.dispatch(batch).await;
            }
        }
        if let Some(batch) = self.former.take(BatchType::Drain) {
            self.dispatch(batch).await;
        }

        self.dispatcher.wait_idle().await;
        info!(stats = ?self.dispatcher.stats(), "Queue flushed");
    }

    async fn dispatch(&self, batch: Batch) {
        let batch_id = batch.id().to_string();
        let events = batch.size();
        let trigger = batch.batch_type();
        if let Err(e) = self.dispatcher.dispatch(batch).await {
            error!(batch_id = %batch_id, events, error = %e, "Failed to dispatch batch");
        } else if self.debug {
            debug!(batch_id = %batch_id, events, trigger = ?trigger, "Dispatched batch");
        }
    }
}
