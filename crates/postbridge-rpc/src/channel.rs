//! The channel capability a connection runs over.
//!
//! A channel moves opaque values between two contexts. The connection only
//! needs to send messages and to add or remove listeners; how the bytes
//! travel, and who is allowed to talk, is the channel's business.

use parking_lot::Mutex;
use postbridge_core::Message;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handler invoked for every value arriving on a channel.
pub type Listener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Error raised by a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The payload cannot be carried by this transport.
    #[error("payload cannot be transported: {0}")]
    Rejected(String),
    #[error("channel closed")]
    Closed,
    /// An incoming frame could not be normalized into a value.
    #[error("invalid message frame: {0}")]
    InvalidFrame(String),
}

/// A message capability shared by the handshake, the call receiver and the
/// call sender.
pub trait Channel: Send + Sync {
    /// Send a message to the peer.
    fn send(&self, message: &Message) -> Result<(), ChannelError>;

    /// Start delivering incoming values to `listener`.
    fn add_listener(&self, listener: Listener) -> ListenerId;

    /// Stop delivering to the listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}

/// An incoming value, normalized to `{ data }`.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    data: Value,
    message: Option<Message>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        let message = Message::from_value(&data);
        Self { data, message }
    }

    /// Normalize a text frame (JSON) from a string-based transport.
    pub fn from_text(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text)
            .map(Self::new)
            .map_err(|e| ChannelError::InvalidFrame(e.to_string()))
    }

    /// The raw value as delivered.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The protocol message, or `None` for unrelated traffic.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }
}

/// Listener registry for channel implementations.
///
/// Dispatch runs over a snapshot, so listeners may add or remove listeners
/// (themselves included) while an event is being delivered.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener registered when dispatch starts.
    pub fn dispatch(&self, event: &MessageEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
