use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Event payload
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Empty,
    Map(HashMap<String, serde_json::Value>),
}

/// Build event
#[derive(Debug, Clone)]
pub struct BuildEvent {
    /// Event key (e.g., "build.step.started")
    pub key: EventKey,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BuildEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, EventPayload::Empty)
    }

    /// Create an event with a map payload
    pub fn with_map(key: impl Into<String>, map: HashMap<String, serde_json::Value>) -> Self {
        Self::new(key, EventPayload::Map(map))
    }

    /// Look up a field of a map payload.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::Map(map) => map.get(name),
            EventPayload::Empty => None,
        }
    }
}

/// Event emitter
///
/// Sending never blocks; events are dropped when nobody subscribes.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<BuildEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: BuildEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const BUILD_STEP_STARTED: &str = "build.step.started";
    pub const BUILD_STEP_COMPLETED: &str = "build.step.completed";
    pub const BUILD_FAILED: &str = "build.failed";
    pub const BUILD_COMPLETED: &str = "build.completed";
}
