#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Resolves on the first SIGINT (Ctrl+C) or, on unix, SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        let mut sigterm = unix_signal(SignalKind::terminate())?;
        let received = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                ShutdownSignal::Interrupt
            }
            _ = sigterm.recv() => ShutdownSignal::Terminate,
        };
        info!(signal = ?received, "Received shutdown signal");
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!(signal = ?ShutdownSignal::Interrupt, "Received shutdown signal");
        Ok(ShutdownSignal::Interrupt)
    }
}
