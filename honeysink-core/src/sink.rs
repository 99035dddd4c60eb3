//! The sink the upstream pipeline drives: accept records, flush, close.

use std::time::Duration;

use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::buffer::{BatchBuffer, BufferMessage};
use crate::config::SinkConfig;
use crate::dispatcher::Dispatcher;
use crate::pool::AdmissionPool;
use crate::record::Record;
use crate::reporter::{Reporter, SinkMetrics};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::{Error, Result};

/// Snapshot of the sink counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Records the endpoint accepted. This includes records given a 2xx status inside a non-2xx
    /// batch response, so a rejected batch can still add to it.
    pub total_sent: u64,
    /// Records given up on, including each record left out of a request because it could not
    /// be encoded.
    pub total_failed: u64,
    /// Records resubmitted on their own after their batch partially failed.
    pub total_retried: u64,
    /// Records whose per-record status was missing or unusable. They are neither sent nor failed.
    pub total_indeterminate: u64,
    /// Requests currently holding a permit.
    pub in_flight: usize,
}

/// Everything that goes away on close.
struct Running<T> {
    sender: mpsc::UnboundedSender<BufferMessage>,
    buffer: JoinHandle<()>,
    dispatcher: Dispatcher<T>,
}

/// Batching sink posting records to the Honeycomb batch endpoint.
///
/// Must be created inside a tokio runtime, the batch buffer runs as a task on it. Delivery
/// failures never surface through this API, they are logged and counted (see [BatchSink::stats]).
pub struct BatchSink<T = ReqwestTransport> {
    running: Mutex<Option<Running<T>>>,
    reporter: Reporter,
    pool: AdmissionPool,
    drain_timeout: Duration,
}

impl BatchSink<ReqwestTransport> {
    pub fn new(config: SinkConfig) -> Result<Self> {
        let config = config.validate()?;
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, transport)
    }
}

impl<T> BatchSink<T>
where
    T: HttpTransport + Clone + Sync + 'static,
{
    pub fn with_transport(config: SinkConfig, transport: T) -> Result<Self> {
        let config = config.validate()?;
        let reporter = Reporter::new(SinkMetrics::default());
        let dispatcher = Dispatcher::new(&config, transport, reporter.clone())?;
        let pool = dispatcher.pool().clone();

        let (sender, receiver) = mpsc::unbounded_channel();
        let buffer = BatchBuffer::new(
            receiver,
            config.flush_size,
            config.idle_flush_time,
            dispatcher.clone(),
        );
        let buffer = tokio::spawn(buffer.run());

        info!(
            url = %config.batch_url(),
            dataset = %config.dataset,
            flush_size = config.flush_size,
            idle_flush_time = ?config.idle_flush_time,
            retry_individual = config.retry_individual,
            pool_max = config.pool_max,
            "Honeycomb batch sink started"
        );

        Ok(Self {
            running: Mutex::new(Some(Running {
                sender,
                buffer,
                dispatcher,
            })),
            reporter,
            pool,
            drain_timeout: config.drain_timeout,
        })
    }

    /// Adds a record to the pending batch. Never waits.
    pub fn accept(&self, record: Record) -> Result<()> {
        self.accept_many(std::iter::once(record))
    }

    /// Adds records to the pending batch in iteration order. Never waits.
    pub fn accept_many(&self, records: impl IntoIterator<Item = Record>) -> Result<()> {
        let guard = self.running.lock();
        let running = guard.as_ref().ok_or_else(closed)?;
        for record in records {
            running
                .sender
                .send(BufferMessage::Record(record))
                .map_err(|_| closed())?;
        }
        Ok(())
    }

    /// Hands the pending batch, if any, to the dispatcher. Resolves once its request has been
    /// initiated, not when it completes.
    pub async fn flush(&self) -> Result<()> {
        let sender = {
            let guard = self.running.lock();
            guard.as_ref().ok_or_else(closed)?.sender.clone()
        };
        let (tx, rx) = oneshot::channel();
        sender
            .send(BufferMessage::Flush { respond_to: tx })
            .map_err(|_| closed())?;
        rx.await
            .map_err(|e| Error::ActorPatternRecv(format!("batch buffer went away: {e}")))
    }

    /// Flushes what is left, then waits up to `drain_timeout` for in-flight requests and the
    /// retries they spawn. Requests still running after that are abandoned.
    pub async fn close(&self) -> Result<()> {
        let Running {
            sender,
            buffer,
            dispatcher,
        } = self.running.lock().take().ok_or_else(closed)?;

        // the buffer flushes one last time once its channel is closed
        drop(sender);
        if let Err(e) = buffer.await {
            warn!(?e, "Batch buffer task failed");
        }

        let drained = dispatcher.drain(self.drain_timeout).await;
        drop(dispatcher);

        let stats = self.stats();
        info!(
            drained,
            total_sent = stats.total_sent,
            total_failed = stats.total_failed,
            total_retried = stats.total_retried,
            total_indeterminate = stats.total_indeterminate,
            "Honeycomb batch sink closed"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.running.lock().is_none()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            total_sent: self.reporter.total_sent(),
            total_failed: self.reporter.total_failed(),
            total_retried: self.reporter.total_retried(),
            total_indeterminate: self.reporter.total_indeterminate(),
            in_flight: self.pool.in_flight(),
        }
    }

    /// Registers the sink counters under the `honeysink` prefix.
    pub fn register_metrics(&self, registry: &mut Registry) {
        self.reporter.metrics().register(registry);
    }
}

fn closed() -> Error {
    Error::Closed("sink is closed".to_string())
}
