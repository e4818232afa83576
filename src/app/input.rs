use crate::domain::{IngestError, MeterEvent};
use crate::pipeline::MeteringPipeline;
use crate::sender::Transport;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardSummary {
    pub lines: u64,
    pub metered: u64,
    pub skipped: u64,
}

/// Meters every newline-delimited JSON event read from `reader` until EOF.
///
/// Blank lines are ignored. Lines that do not parse or fail validation are
/// logged and skipped, as are lines that are not UTF-8. Stops early once the
/// pipeline refuses new events or the reader fails.
pub async fn forward_events<R, T>(
    mut reader: R,
    pipeline: &MeteringPipeline<T>,
) -> Result<ForwardSummary, IngestError>
where
    R: AsyncBufRead + Unpin,
    T: Transport,
{
    let mut summary = ForwardSummary::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        summary.lines += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(line = summary.lines, error = %e, "Skipping line that is not UTF-8");
                summary.skipped += 1;
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: MeterEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = summary.lines, error = %e, "Skipping malformed event");
                summary.skipped += 1;
                continue;
            }
        };

        match pipeline.meter(event).await {
            Ok(()) => summary.metered += 1,
            Err(IngestError::Validation(e)) => {
                warn!(line = summary.lines, error = %e, "Skipping invalid event");
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    debug!(summary = ?summary, "Input exhausted");
    Ok(summary)
}
