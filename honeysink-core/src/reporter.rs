//! Running totals and operator-visible failure signaling.
//!
//! Counters are `prometheus_client` counters owned by [SinkMetrics] and shared (they are
//! `Arc`-backed) between every clone of the [Reporter], so increments from concurrent completion
//! tasks are atomic.

use http::StatusCode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use serde_json::Value;
use tracing::{error, warn};

use crate::Error;
use crate::error::TransportError;

const METRICS_PREFIX: &str = "honeysink";
const FAILURE_PREFIX: &str = "[Honeycomb Batch Output Failure]";

#[derive(Clone, Debug, Default)]
pub(crate) struct SinkMetrics {
    pub(crate) records_sent: Counter,
    pub(crate) records_failed: Counter,
    pub(crate) records_retried: Counter,
    pub(crate) records_indeterminate: Counter,
    pub(crate) requests: Counter,
    pub(crate) request_failures: Counter,
}

impl SinkMetrics {
    pub(crate) fn register(&self, registry: &mut Registry) {
        let registry = registry.sub_registry_with_prefix(METRICS_PREFIX);
        registry.register(
            "records_sent",
            "Records accepted by the ingestion endpoint",
            self.records_sent.clone(),
        );
        registry.register(
            "records_failed",
            "Records that failed and were given up on",
            self.records_failed.clone(),
        );
        registry.register(
            "records_retried",
            "Records resubmitted individually after a partial batch failure",
            self.records_retried.clone(),
        );
        registry.register(
            "records_indeterminate",
            "Records whose per-record status was missing from the response",
            self.records_indeterminate.clone(),
        );
        registry.register(
            "requests",
            "Batch requests sent to the ingestion endpoint",
            self.requests.clone(),
        );
        registry.register(
            "request_failures",
            "Batch requests that ended without a 2xx response",
            self.request_failures.clone(),
        );
    }
}

/// Context of a failure that makes the sink give up on a set of records.
#[derive(Debug)]
pub(crate) enum Failure<'a> {
    /// Non-2xx response that could not be broken down per record.
    Rejected {
        url: &'a str,
        status: StatusCode,
        response_body: &'a [u8],
        num_docs: usize,
        retry_individual: bool,
    },
    /// No response at all.
    Transport {
        url: &'a str,
        error: &'a TransportError,
        body_len: usize,
        num_docs: usize,
    },
    /// The batch never made it into a request.
    Construction { error: &'a Error, num_docs: usize },
    /// One record had no wire form and was left out of its batch's request.
    Unencodable { error: &'a Error, index: usize },
    /// Handling the request panicked.
    Panicked { message: &'a str, num_docs: usize },
}

impl Failure<'_> {
    fn num_docs(&self) -> usize {
        match self {
            Failure::Rejected { num_docs, .. }
            | Failure::Transport { num_docs, .. }
            | Failure::Construction { num_docs, .. }
            | Failure::Panicked { num_docs, .. } => *num_docs,
            Failure::Unencodable { .. } => 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Reporter {
    metrics: SinkMetrics,
}

impl Reporter {
    pub(crate) fn new(metrics: SinkMetrics) -> Self {
        Self { metrics }
    }

    pub(crate) fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }

    /// Adds `n` forwarded records, returns the new total.
    pub(crate) fn record_sent(&self, n: usize) -> u64 {
        self.metrics.records_sent.inc_by(n as u64) + n as u64
    }

    pub(crate) fn record_request(&self) {
        self.metrics.requests.inc();
    }

    pub(crate) fn record_retried(&self) {
        self.metrics.records_retried.inc();
    }

    /// Logs a status entry that carries no usable code. The record is neither retried nor
    /// counted as sent or failed.
    pub(crate) fn record_indeterminate(&self, index: usize, status: Option<&Value>) {
        self.metrics.records_indeterminate.inc();
        warn!(
            index,
            status = %status.map_or_else(|| "<absent>".to_string(), |v| v.to_string()),
            "Status code missing in response"
        );
    }

    pub(crate) fn total_sent(&self) -> u64 {
        self.metrics.records_sent.get()
    }

    pub(crate) fn total_failed(&self) -> u64 {
        self.metrics.records_failed.get()
    }

    pub(crate) fn total_retried(&self) -> u64 {
        self.metrics.records_retried.get()
    }

    pub(crate) fn total_indeterminate(&self) -> u64 {
        self.metrics.records_indeterminate.get()
    }

    /// Counts the records of `failure` as failed and emits one error event for it. Never panics
    /// and never affects control flow.
    pub(crate) fn report_failure(&self, failure: Failure<'_>) {
        let num_docs = failure.num_docs();
        let total_failed = self.metrics.records_failed.inc_by(num_docs as u64) + num_docs as u64;
        if !matches!(failure, Failure::Unencodable { .. }) {
            self.metrics.request_failures.inc();
        }

        match failure {
            Failure::Rejected {
                url,
                status,
                response_body,
                num_docs,
                retry_individual,
            } => {
                error!(
                    response_code = status.as_u16(),
                    url,
                    response_body = %String::from_utf8_lossy(response_body),
                    num_docs,
                    retry_individual,
                    total_failed,
                    "{FAILURE_PREFIX} Encountered non-200 HTTP code {}",
                    status.as_u16()
                );
            }
            Failure::Transport {
                url,
                error,
                body_len,
                num_docs,
            } => {
                error!(
                    url,
                    method = "POST",
                    error = %error,
                    class = error.kind(),
                    body_len,
                    num_docs,
                    total_failed,
                    "{FAILURE_PREFIX} Could not access URL"
                );
            }
            Failure::Construction { error, num_docs } => {
                error!(
                    ?error,
                    docs = num_docs,
                    total_failed,
                    "{FAILURE_PREFIX} Could not build request for batch"
                );
            }
            Failure::Unencodable { error, index } => {
                error!(
                    ?error,
                    index,
                    total_failed,
                    "{FAILURE_PREFIX} Dropped record that cannot be encoded"
                );
            }
            Failure::Panicked { message, num_docs } => {
                error!(
                    panic = message,
                    docs = num_docs,
                    total_failed,
                    "{FAILURE_PREFIX} Unexpected error while handling batch"
                );
            }
        }
    }
}
