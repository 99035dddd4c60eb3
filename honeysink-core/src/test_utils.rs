//! In-memory [HttpTransport] and log capture for unit tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Metadata, Subscriber};

use crate::error::TransportError;
use crate::transport::{HttpTransport, TransportResponse};

/// A request as seen by the [MockTransport].
#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Value,
}

impl CapturedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Documents posted for `dataset`, empty if there are none.
    pub(crate) fn documents(&self, dataset: &str) -> Vec<Value> {
        self.body
            .get(dataset)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockResponse(Result<TransportResponse, TransportError>);

impl MockResponse {
    pub(crate) fn status(code: u16) -> Self {
        Self::raw(code, "")
    }

    pub(crate) fn json(code: u16, body: Value) -> Self {
        Self::raw(code, &body.to_string())
    }

    pub(crate) fn raw(code: u16, body: &str) -> Self {
        Self(Ok(TransportResponse {
            status: StatusCode::from_u16(code).unwrap(),
            body: Bytes::from(body.to_string()),
        }))
    }

    pub(crate) fn error(error: TransportError) -> Self {
        Self(Err(error))
    }
}

type Responder = dyn Fn(&CapturedRequest) -> MockResponse + Send + Sync;

/// Records every request and answers with whatever the responder returns. A gated transport
/// holds every request until [MockTransport::open_gate] is called.
#[derive(Clone)]
pub(crate) struct MockTransport {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    gate: Option<watch::Sender<bool>>,
}

impl MockTransport {
    pub(crate) fn new(
        responder: impl Fn(&CapturedRequest) -> MockResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub(crate) fn gated(mut self) -> Self {
        let (tx, _) = watch::channel(false);
        self.gate = Some(tx);
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    /// Requests received whose response has not been returned yet.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every request received so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }
}

impl HttpTransport for MockTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<TransportResponse, TransportError> {
        let request = CapturedRequest {
            url: url.to_string(),
            headers: headers.clone(),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        };
        self.requests.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let mut rx = gate.subscribe();
            let _ = rx.wait_for(|open| *open).await;
        } else {
            tokio::task::yield_now().await;
        }

        let response = (self.responder)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response.0
    }
}

/// Captures the events emitted on the current thread while alive. Each event is kept as
/// `level = ..; field = ..; ` text, message included.
///
/// Tasks spawned on a current-thread runtime are captured too.
pub(crate) struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
    _guard: DefaultGuard,
}

impl LogCapture {
    pub(crate) fn new() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let guard = tracing::subscriber::set_default(CaptureSubscriber {
            events: Arc::clone(&events),
        });
        Self {
            events,
            _guard: guard,
        }
    }

    /// Events at `level` whose text contains `needle`.
    pub(crate) fn matching(&self, level: Level, needle: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(l, text)| *l == level && text.contains(needle))
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub(crate) fn count(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|(l, _)| *l == level).count()
    }
}

impl fmt::Display for LogCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, text) in self.events.lock().iter() {
            writeln!(f, "{text}")?;
        }
        Ok(())
    }
}

struct CaptureSubscriber {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl Subscriber for CaptureSubscriber {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let level = *event.metadata().level();
        let mut text = format!("level = {level}; ");
        event.record(&mut FieldWriter(&mut text));
        self.events.lock().push((level, text));
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

struct FieldWriter<'a>(&'a mut String);

impl Visit for FieldWriter<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        use std::fmt::Write;
        let _ = write!(self.0, "{} = {:?}; ", field.name(), value);
    }
}
