//! Newline-delimited JSON intake: one event object per line.

use chrono::{SecondsFormat, Utc};
use honeysink_core::{BatchSink, HttpTransport, Record, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What came out of the input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Intake {
    pub(crate) accepted: u64,
    pub(crate) skipped: u64,
}

/// Feeds every event line of `reader` into `sink` until EOF, a read error or cancellation.
pub(crate) async fn read_records<R, T>(
    reader: R,
    sink: &BatchSink<T>,
    cln_token: CancellationToken,
) -> Result<Intake>
where
    R: AsyncBufRead + Unpin,
    T: HttpTransport + Clone + Sync + 'static,
{
    let mut lines = reader.lines();
    let mut intake = Intake::default();
    let mut line_no: u64 = 0;

    loop {
        let line = tokio::select! {
            biased;

            _ = cln_token.cancelled() => {
                info!("Intake cancelled");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(lines = line_no, "End of input");
                break;
            }
            Err(e) => {
                error!(?e, lines = line_no, "Reading input failed, stopping intake");
                break;
            }
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(record) => {
                sink.accept(record)?;
                intake.accepted += 1;
            }
            Err(e) => {
                warn!(line = line_no, %e, "Skipping malformed event");
                intake.skipped += 1;
            }
        }
    }
    Ok(intake)
}

/// One event object. A missing `@timestamp` is set to now.
fn parse_line(line: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(line)?;
    let record = Record::try_from(value)?;
    Ok(record.with_default_timestamp(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)))
}
