//! Structured session events. The proxy session emits one event per state
//! transition plus the message and TLS milestones, so tests can assert the
//! tunnel/forward machine from the outside instead of instrumenting call
//! stacks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    SessionAccepted,
    StateChanged,
    RequestHeaders,
    ResponseHeaders,
    BodyChunk,
    TlsHandshakeStarted,
    TlsHandshakeSucceeded,
    TlsHandshakeFailed,
    SessionClosed,
}

/// Identity of the session an event belongs to, snapshotted at emit time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionScope {
    pub session_id: u64,
    pub client_addr: String,
    pub remote_host: String,
    pub remote_port: u16,
    pub https: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub scope: SessionScope,
    pub occurred_at_unix_ms: u128,
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    pub fn new(kind: EventType, scope: SessionScope) -> Self {
        Self {
            kind,
            scope,
            occurred_at_unix_ms: now_unix_ms(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: Event) {}
}

/// Collecting sink for tests.
#[derive(Debug, Default, Clone)]
pub struct VecEventSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl VecEventSink {
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().expect("event sink lock poisoned").clone()
    }

    /// `to` attributes of every StateChanged event, in emission order.
    pub fn state_trace(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter(|event| event.kind == EventType::StateChanged)
            .filter_map(|event| event.attribute("to").map(str::to_string))
            .collect()
    }
}

impl EventSink for VecEventSink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .expect("event sink lock poisoned")
            .push(event);
    }
}

fn now_unix_ms() -> u128 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis(),
        Err(_) => 0,
    }
}
