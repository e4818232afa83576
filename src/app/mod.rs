pub mod config;
pub mod input;
pub mod logging_system;
pub mod shutdown;

pub use config::{AppConfigError, Config, FileConfig, LogFormat, LogLevel};
pub use input::{ForwardSummary, forward_events};
pub use logging_system::{LoggingError, setup_logging};
pub use shutdown::{ShutdownSignal, wait_for_signal};

use crate::pipeline::MeteringPipeline;
use anyhow::Context;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

/// The `meter-forwarder` binary: NDJSON in, batched ingest calls out.
pub struct App {
    config: Config,
    pipeline: MeteringPipeline,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, AppConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, AppConfigError> {
        let pipeline = MeteringPipeline::new(config.client_config()?, config.pipeline_config()?)
            .map_err(|e| AppConfigError::InvalidConfig(e.to_string()))?;
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &MeteringPipeline {
        &self.pipeline
    }

    /// Forwards input until EOF or a shutdown signal, then drains the
    /// pipeline.
    pub async fn run(self) -> anyhow::Result<Option<ForwardSummary>> {
        info!("Starting meter-forwarder v{}", env!("CARGO_PKG_VERSION"));
        info!(
            endpoint = %self.config.endpoint,
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval_ms,
            "Configuration loaded"
        );
        self.pipeline.start()?;

        let summary = match &self.config.input_file {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open input file {}", path.display()))?;
                self.forward_until_signal(BufReader::new(file)).await
            }
            None => {
                self.forward_until_signal(BufReader::new(tokio::io::stdin()))
                    .await
            }
        };

        let drained = self.pipeline.shutdown().await;
        info!(stats = ?self.pipeline.stats(), "meter-forwarder stopped");
        drained.context("Pipeline did not shut down cleanly")?;
        summary
    }

    async fn forward_until_signal<R>(&self, reader: R) -> anyhow::Result<Option<ForwardSummary>>
    where
        R: AsyncBufRead + Unpin,
    {
        tokio::select! {
            forwarded = forward_events(reader, &self.pipeline) => {
                let summary = forwarded.context("Forwarding stopped")?;
                info!(
                    lines = summary.lines,
                    metered = summary.metered,
                    skipped = summary.skipped,
                    "Reached end of input"
                );
                Ok(Some(summary))
            }
            signal = wait_for_signal() => {
                match signal {
                    Ok(signal) => info!(signal = ?signal, "Stopping intake"),
                    Err(e) => error!(error = %e, "Signal handler failed, stopping intake"),
                }
                Ok(None)
            }
        }
    }
}

/// Entry point of the `meter-forwarder` binary.
pub async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args_and_env(std::env::args_os()) {
        Ok(config) => config,
        // --help, --version and usage errors print themselves
        Err(AppConfigError::Cli(e)) => e.exit(),
        Err(e) => return Err(e).context("Configuration error"),
    };

    setup_logging(config.log_level, config.log_format)?;

    let app = App::from_config(config)?;
    app.run().await?;
    Ok(())
}
