use serde_json::Value;
use tracing::debug;

use super::{Dispatched, Dispatcher};
use crate::batch::Batch;
use crate::transport::HttpTransport;
use crate::{Error, Result};

const STATUS_FIELD: &str = "status";

/// Verdict for one record of a partially failed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RecordStatus {
    Succeeded,
    Failed(u64),
    /// No usable code: neither retried nor counted.
    Indeterminate,
}

impl RecordStatus {
    fn classify(entry: Option<&Value>) -> Self {
        let code = entry
            .and_then(|entry| entry.get(STATUS_FIELD))
            .and_then(Value::as_u64);
        match code {
            None => RecordStatus::Indeterminate,
            Some(code) if (200..300).contains(&code) => RecordStatus::Succeeded,
            Some(code) => RecordStatus::Failed(code),
        }
    }
}

/// Per-record status entries out of a non-2xx response body. The statuses are the first value of
/// the response object, or the body itself when it is an array. They line up by index with the
/// documents of the request.
pub(super) fn parse_statuses(body: &[u8]) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Encode(format!("response body is not JSON: {e}")))?;
    let statuses = match value {
        Value::Array(statuses) => statuses,
        Value::Object(map) => match map.into_iter().next() {
            Some((_, Value::Array(statuses))) => statuses,
            Some((key, _)) => {
                return Err(Error::Encode(format!(
                    "response value under {key:?} is not an array"
                )));
            }
            None => return Err(Error::Encode("response object is empty".to_string())),
        },
        _ => {
            return Err(Error::Encode(
                "response body is neither an object nor an array".to_string(),
            ));
        }
    };
    Ok(statuses)
}

impl<T> Dispatcher<T>
where
    T: HttpTransport + Clone + Sync + 'static,
{
    /// Resubmits each failed record of `batch` as its own one-record batch. Succeeded records are
    /// counted as sent, indeterminate ones are only logged.
    pub(super) async fn retry_failed(&self, batch: Batch, statuses: Vec<Value>) {
        let parent_depth = batch.depth();
        let num_docs = batch.len();
        let mut succeeded = 0;
        let mut retried = 0;

        for (index, record) in batch.into_records().into_iter().enumerate() {
            let entry = statuses.get(index);
            match RecordStatus::classify(entry) {
                RecordStatus::Succeeded => succeeded += 1,
                RecordStatus::Indeterminate => self.reporter.record_indeterminate(index, entry),
                RecordStatus::Failed(code) => {
                    debug!(index, code, "Retrying record individually");
                    self.reporter.record_retried();
                    retried += 1;
                    let retry = Batch::retry_of(parent_depth, record);
                    if let Dispatched::ConstructionFailed(e) = self.dispatch(retry).await {
                        debug!(?e, index, "Individual retry could not be dispatched");
                    }
                }
            }
        }

        // 2xx entries of a rejected response count as sent
        if succeeded > 0 {
            self.reporter.record_sent(succeeded);
        }
        debug!(
            docs = num_docs,
            succeeded, retried, "Split partially failed batch"
        );
    }
}
