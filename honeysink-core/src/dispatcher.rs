//! Turns a [Batch] into one POST to the batch endpoint and routes the outcome.
//!
//! `dispatch` encodes the batch, waits for an [AdmissionPool] permit and hands the request to a
//! tracked task, returning as soon as the request is in flight. The task owns the permit and
//! drops it as soon as the transport answers, then routes the [Outcome]:
//! - 2xx: the whole batch counts as sent.
//! - non-2xx on a batch that can be split (see [Batch::can_split]) with individual retry on: the
//!   per-record statuses are parsed and failed records are resubmitted one by one through
//!   `dispatch` again, see [retry].
//! - any other non-2xx, or a transport failure: the whole batch counts as failed and is reported.
//!
//! A panic while handling a request is caught and reported like a failure of the whole batch, the
//! permit is released by unwinding.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::config::SinkConfig;
use crate::error::TransportError;
use crate::pool::{AdmissionPool, Permit};
use crate::reporter::{Failure, Reporter};
use crate::transport::{HttpTransport, TransportResponse};
use crate::{Error, Result};

/// Per-record status parsing and individual resubmission of failed records.
mod retry;

/// How dispatch initiation ended.
#[derive(Debug, Clone)]
pub(crate) enum Dispatched {
    /// A permit was acquired and the request is in flight.
    Initiated,
    /// The batch never became a request. The failure has already been logged and counted.
    ConstructionFailed(Error),
}

/// What came back for one request.
#[derive(Debug)]
pub(crate) enum Outcome {
    Accepted { status: StatusCode },
    Rejected { status: StatusCode, body: Bytes },
    Failed(TransportError),
}

impl From<std::result::Result<TransportResponse, TransportError>> for Outcome {
    fn from(result: std::result::Result<TransportResponse, TransportError>) -> Self {
        match result {
            Ok(response) if response.status.is_success() => Outcome::Accepted {
                status: response.status,
            },
            Ok(response) => Outcome::Rejected {
                status: response.status,
                body: response.body,
            },
            Err(e) => Outcome::Failed(e),
        }
    }
}

struct RequestSettings {
    url: String,
    dataset: String,
    headers: HeaderMap,
    retry_individual: bool,
}

#[derive(Clone)]
pub(crate) struct Dispatcher<T> {
    transport: T,
    pool: AdmissionPool,
    reporter: Reporter,
    tasks: TaskTracker,
    settings: Arc<RequestSettings>,
}

impl<T> Dispatcher<T>
where
    T: HttpTransport + Clone + Sync + 'static,
{
    pub(crate) fn new(config: &SinkConfig, transport: T, reporter: Reporter) -> Result<Self> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key_header = HeaderName::from_bytes(config.write_key_header.as_bytes())
            .map_err(|e| Error::Config(format!("invalid write key header name: {e}")))?;
        let mut key_value = HeaderValue::from_str(&config.write_key)
            .map_err(|e| Error::Config(format!("invalid write key: {e}")))?;
        key_value.set_sensitive(true);
        headers.insert(key_header, key_value);

        Ok(Self {
            transport,
            pool: AdmissionPool::new(config.pool_max),
            reporter,
            tasks: TaskTracker::new(),
            settings: Arc::new(RequestSettings {
                url: config.batch_url(),
                dataset: config.dataset.clone(),
                headers,
                retry_individual: config.retry_individual,
            }),
        })
    }

    pub(crate) fn pool(&self) -> &AdmissionPool {
        &self.pool
    }

    /// Sends `batch` without waiting for the response. Resolves once the request is in flight,
    /// which may take a while if every permit is held.
    pub(crate) fn dispatch(&self, batch: Batch) -> BoxFuture<'static, Dispatched> {
        let this = self.clone();
        async move { this.initiate(batch).await }.boxed()
    }

    async fn initiate(self, mut batch: Batch) -> Dispatched {
        let batch_len = batch.len();
        let body = match batch.encode(&self.settings.dataset) {
            Ok((body, rejected)) => {
                for (index, error) in &rejected {
                    self.reporter.report_failure(Failure::Unencodable {
                        error,
                        index: *index,
                    });
                }
                body
            }
            Err(e) => return self.construction_failed(e, batch_len),
        };
        let num_docs = batch.len();

        let permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(e) => return self.construction_failed(e, num_docs),
        };
        debug!(tokens = self.pool.available(), "Got token");

        let tasks = self.tasks.clone();
        let reporter = self.reporter.clone();
        tasks.spawn(async move {
            let handled = AssertUnwindSafe(async move {
                let body_len = body.len();
                let outcome = self.send(body, permit).await;
                self.resolve(batch, outcome, body_len).await;
            })
            .catch_unwind()
            .await;
            if let Err(panic) = handled {
                reporter.report_failure(Failure::Panicked {
                    message: panic_message(panic.as_ref()),
                    num_docs,
                });
            }
        });
        Dispatched::Initiated
    }

    fn construction_failed(&self, error: Error, num_docs: usize) -> Dispatched {
        self.reporter
            .report_failure(Failure::Construction { error: &error, num_docs });
        Dispatched::ConstructionFailed(error)
    }

    /// Performs the request. The permit goes back to the pool as soon as the transport is done,
    /// before the outcome is acted on, so resubmissions never wait on their parent's permit.
    async fn send(&self, body: Bytes, permit: Permit) -> Outcome {
        self.reporter.record_request();
        let result = self
            .transport
            .post(&self.settings.url, &self.settings.headers, body)
            .await;
        permit.release();
        Outcome::from(result)
    }

    async fn resolve(&self, batch: Batch, outcome: Outcome, body_len: usize) {
        let num_docs = batch.len();
        match outcome {
            Outcome::Accepted { status } => {
                let total = self.reporter.record_sent(num_docs);
                debug!(
                    docs = num_docs,
                    response_code = status.as_u16(),
                    total,
                    "Successfully submitted"
                );
            }
            Outcome::Rejected { status, body } => {
                if self.settings.retry_individual && batch.can_split() {
                    match retry::parse_statuses(&body) {
                        Ok(statuses) => {
                            self.retry_failed(batch, statuses).await;
                            return;
                        }
                        Err(e) => {
                            warn!(
                                ?e,
                                response_code = status.as_u16(),
                                "Response carries no per-record statuses, failing the whole batch"
                            );
                        }
                    }
                }
                self.reporter.report_failure(Failure::Rejected {
                    url: &self.settings.url,
                    status,
                    response_body: &body,
                    num_docs,
                    retry_individual: self.settings.retry_individual,
                });
            }
            Outcome::Failed(error) => {
                self.reporter.report_failure(Failure::Transport {
                    url: &self.settings.url,
                    error: &error,
                    body_len,
                    num_docs,
                });
            }
        }
    }

    /// Waits for in-flight requests, and the resubmissions they spawn, for at most `timeout`.
    /// Returns `false` if some were still running when the timeout expired.
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        self.tasks.close();
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    in_flight = self.pool.in_flight(),
                    pool_max = self.pool.capacity(),
                    tasks = self.tasks.len(),
                    ?timeout,
                    "Drain timeout expired with requests still in flight"
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
