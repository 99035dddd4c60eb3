use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Encode Error - {0}")]
    Encode(String),

    #[error("Transport Error - {0}")]
    Transport(#[from] TransportError),

    #[error("Admission Pool Error - {0}")]
    Pool(String),

    #[error("Sink Closed - {0}")]
    Closed(String),

    #[error("OneShot Receiver Error - {0}")]
    ActorPatternRecv(String),
}

/// Failure to get any HTTP response out of the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The client rejected the request before any attempt was made.
    #[error("request build failed: {0}")]
    Build(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    /// A response arrived but its body could not be read.
    #[error("reading response body failed: {0}")]
    Body(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Short class name used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Build(_) => "build",
            TransportError::Timeout(_) => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Body(_) => "body",
            TransportError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::Build(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encode(e.to_string())
    }
}
