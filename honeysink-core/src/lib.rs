//! Batching sink for the Honeycomb batch ingestion API.
//!
//! Records accepted by a [BatchSink] are grouped into batches which are flushed when they reach
//! `flush_size` records or have been idle for `idle_flush_time`:
//! - Every flushed batch becomes one POST to `<api_host>/1/batch`, at most `pool_max` at a time.
//! - When a multi-record batch is rejected, the failed records are resubmitted individually, once.
//! - Whatever still fails is logged and counted, never surfaced to the producer.

mod error;
pub use crate::error::{Error, Result, TransportError};

mod config;
pub use crate::config::{DEFAULT_API_HOST, DEFAULT_WRITE_KEY_HEADER, SinkConfig};

mod record;
pub use crate::record::{Document, Record, SAMPLERATE_FIELD, TIMESTAMP_FIELD};

mod transport;
pub use crate::transport::{HttpTransport, LocalHttpTransport, ReqwestTransport, TransportResponse};

mod sink;
pub use crate::sink::{BatchSink, Stats};

mod batch;
mod buffer;
mod dispatcher;
mod pool;
mod reporter;

#[cfg(test)]
mod test_utils;
