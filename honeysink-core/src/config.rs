//! Settings recognized by the sink.
//!
//! Only `write_key` and `dataset` are required, everything else has a default. Durations are
//! expressed in (possibly fractional) seconds when deserialized.

use std::fmt;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use serde::Deserialize;

use crate::{Error, Result};

pub const DEFAULT_API_HOST: &str = "https://api.honeycomb.io";
pub const DEFAULT_WRITE_KEY_HEADER: &str = "X-Team-Write-Key";
const DEFAULT_FLUSH_SIZE: usize = 50;
const DEFAULT_IDLE_FLUSH_TIME_SECS: u64 = 5;
const DEFAULT_RETRY_INDIVIDUAL: bool = true;
const DEFAULT_POOL_MAX: usize = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;
const BATCH_PATH: &str = "/1/batch";

#[derive(Clone, Deserialize, PartialEq)]
pub struct SinkConfig {
    /// Base URL of the ingestion API. A bare host is turned into an `http://` URL.
    #[serde(default)]
    pub api_host: Option<String>,
    pub write_key: String,
    pub dataset: String,
    /// Number of pending records that triggers an immediate flush.
    #[serde(default = "default_flush_size")]
    pub flush_size: usize,
    /// How long a non-empty pending batch may wait before it is flushed anyway.
    #[serde(default = "default_idle_flush_time", with = "duration_secs")]
    pub idle_flush_time: Duration,
    /// Resubmit the failed records of a multi-record batch one by one.
    #[serde(default = "default_retry_individual")]
    pub retry_individual: bool,
    /// Maximum number of requests in flight.
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
    /// Upper bound on how long `close` waits for in-flight requests.
    #[serde(default = "default_drain_timeout", with = "duration_secs")]
    pub drain_timeout: Duration,
    #[serde(default = "default_write_key_header")]
    pub write_key_header: String,
}

fn default_flush_size() -> usize {
    DEFAULT_FLUSH_SIZE
}

fn default_idle_flush_time() -> Duration {
    Duration::from_secs(DEFAULT_IDLE_FLUSH_TIME_SECS)
}

fn default_retry_individual() -> bool {
    DEFAULT_RETRY_INDIVIDUAL
}

fn default_pool_max() -> usize {
    DEFAULT_POOL_MAX
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS)
}

fn default_write_key_header() -> String {
    DEFAULT_WRITE_KEY_HEADER.to_string()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl SinkConfig {
    pub fn new(write_key: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            api_host: None,
            write_key: write_key.into(),
            dataset: dataset.into(),
            flush_size: DEFAULT_FLUSH_SIZE,
            idle_flush_time: default_idle_flush_time(),
            retry_individual: DEFAULT_RETRY_INDIVIDUAL,
            pool_max: DEFAULT_POOL_MAX,
            request_timeout: default_request_timeout(),
            drain_timeout: default_drain_timeout(),
            write_key_header: default_write_key_header(),
        }
    }

    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = Some(api_host.into());
        self
    }

    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.flush_size = flush_size;
        self
    }

    pub fn with_idle_flush_time(mut self, idle_flush_time: Duration) -> Self {
        self.idle_flush_time = idle_flush_time;
        self
    }

    pub fn with_retry_individual(mut self, retry_individual: bool) -> Self {
        self.retry_individual = retry_individual;
        self
    }

    pub fn with_pool_max(mut self, pool_max: usize) -> Self {
        self.pool_max = pool_max;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_write_key_header(mut self, header: impl Into<String>) -> Self {
        self.write_key_header = header.into();
        self
    }

    /// Normalizes `api_host` and rejects settings the sink cannot run with.
    pub fn validate(mut self) -> Result<Self> {
        if self.write_key.trim().is_empty() {
            return Err(Error::Config("write_key is required".to_string()));
        }
        if self.dataset.trim().is_empty() {
            return Err(Error::Config("dataset is required".to_string()));
        }
        if self.flush_size == 0 {
            return Err(Error::Config("flush_size must be at least 1".to_string()));
        }
        if self.pool_max == 0 {
            return Err(Error::Config("pool_max must be at least 1".to_string()));
        }
        if self.idle_flush_time.is_zero() {
            return Err(Error::Config(
                "idle_flush_time must be greater than zero".to_string(),
            ));
        }
        HeaderName::from_bytes(self.write_key_header.as_bytes()).map_err(|e| {
            Error::Config(format!(
                "write_key_header {:?} is not a valid header name: {e}",
                self.write_key_header
            ))
        })?;
        HeaderValue::from_str(&self.write_key)
            .map_err(|e| Error::Config(format!("write_key is not a valid header value: {e}")))?;

        self.api_host = Some(normalize_api_host(self.api_host.as_deref()));
        Ok(self)
    }

    /// Base URL after normalization.
    pub fn api_host(&self) -> String {
        normalize_api_host(self.api_host.as_deref())
    }

    /// Full URL of the batch endpoint.
    pub fn batch_url(&self) -> String {
        format!("{}{BATCH_PATH}", self.api_host())
    }
}

fn normalize_api_host(api_host: Option<&str>) -> String {
    let host = match api_host.map(str::trim) {
        None | Some("") => return DEFAULT_API_HOST.to_string(),
        Some(host) => host.trim_end_matches('/'),
    };
    if host.starts_with("http") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

// the write key never shows up in logs
impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("api_host", &self.api_host())
            .field("write_key", &"<redacted>")
            .field("dataset", &self.dataset)
            .field("flush_size", &self.flush_size)
            .field("idle_flush_time", &self.idle_flush_time)
            .field("retry_individual", &self.retry_individual)
            .field("pool_max", &self.pool_max)
            .field("request_timeout", &self.request_timeout)
            .field("drain_timeout", &self.drain_timeout)
            .field("write_key_header", &self.write_key_header)
            .finish()
    }
}
