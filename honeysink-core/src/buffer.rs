//! Accumulates records into the pending batch and decides when it is flushed.
//!
//! The buffer is an actor: intake goes through an unbounded channel so `accept` never waits, and
//! the single actor task owns the pending batch, so a flush always detaches a whole batch before
//! the next record lands in a fresh one. A flush happens when
//! - the pending batch reaches `flush_size`,
//! - `idle_flush_time` has passed since the first record of the pending batch arrived,
//! - a flush is requested explicitly, or
//! - the channel closes (final flush on shutdown).
//!
//! Flushing awaits dispatch initiation, which waits for an admission permit. While it does,
//! records keep queueing in the channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::batch::Batch;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::record::Record;
use crate::transport::HttpTransport;

/// Message sent to the [BatchBuffer] actor.
pub(crate) enum BufferMessage {
    Record(Record),
    Flush { respond_to: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Size,
    Idle,
    Requested,
    Final,
}

pub(crate) struct BatchBuffer<T> {
    receiver: mpsc::UnboundedReceiver<BufferMessage>,
    pending: Vec<Record>,
    flush_size: usize,
    idle_flush_time: Duration,
    /// Set while the pending batch is non-empty.
    idle_deadline: Option<Instant>,
    dispatcher: Dispatcher<T>,
}

impl<T> BatchBuffer<T>
where
    T: HttpTransport + Clone + Sync + 'static,
{
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<BufferMessage>,
        flush_size: usize,
        idle_flush_time: Duration,
        dispatcher: Dispatcher<T>,
    ) -> Self {
        Self {
            receiver,
            pending: Vec::with_capacity(flush_size),
            flush_size,
            idle_flush_time,
            idle_deadline: None,
            dispatcher,
        }
    }

    /// Runs until every sender is gone, then flushes whatever is left.
    pub(crate) async fn run(mut self) {
        loop {
            let deadline = self.idle_deadline;
            tokio::select! {
                biased;

                maybe_msg = self.receiver.recv() => {
                    let Some(msg) = maybe_msg else {
                        break;
                    };
                    self.handle_message(msg).await;
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush(FlushReason::Idle).await;
                }
            }
        }
        self.flush(FlushReason::Final).await;
        info!("Batch buffer stopped");
    }

    async fn handle_message(&mut self, msg: BufferMessage) {
        match msg {
            BufferMessage::Record(record) => self.push(record).await,
            BufferMessage::Flush { respond_to } => {
                self.flush(FlushReason::Requested).await;
                let _ = respond_to.send(());
            }
        }
    }

    async fn push(&mut self, record: Record) {
        if self.pending.is_empty() {
            self.idle_deadline = Some(Instant::now() + self.idle_flush_time);
        }
        self.pending.push(record);
        if self.pending.len() >= self.flush_size {
            self.flush(FlushReason::Size).await;
        }
    }

    /// Detaches the pending batch and waits until its request is in flight.
    async fn flush(&mut self, reason: FlushReason) {
        self.idle_deadline = None;
        if self.pending.is_empty() {
            return;
        }
        let records = std::mem::replace(&mut self.pending, Vec::with_capacity(self.flush_size));
        let num_docs = records.len();
        debug!(?reason, docs = num_docs, "Flushing batch");

        if let Dispatched::ConstructionFailed(e) = self.dispatcher.dispatch(Batch::new(records)).await
        {
            debug!(?e, ?reason, docs = num_docs, "Flushed batch was not dispatched");
        }
    }
}
