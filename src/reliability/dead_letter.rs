use crate::buffer::Batch;
use crate::sender::DeliveryError;
use tokio::sync::mpsc;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// A batch whose delivery was given up on.
#[derive(Debug)]
pub struct DeadLetter {
    pub batch: Batch,
    pub error: DeliveryError,
}

/// Receives batches the dispatcher could not deliver.
///
/// Without a sink, such batches are logged and dropped.
#[cfg_attr(test, automock)]
pub trait DeadLetterSink: Send + Sync {
    fn on_exhausted(&self, dead_letter: DeadLetter);
}

/// Forwards dead letters to a channel so the caller can persist or replay
/// them on its own terms.
impl DeadLetterSink for mpsc::UnboundedSender<DeadLetter> {
    fn on_exhausted(&self, dead_letter: DeadLetter) {
        if let Err(err) = self.send(dead_letter) {
            warn!(
                batch_id = %err.0.batch.id(),
                events = err.0.batch.size(),
                "Dead-letter receiver dropped, discarding batch"
            );
        }
    }
}
