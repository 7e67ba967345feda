//! In-process channel pair.

use crate::channel::{Channel, ChannelError, Listener, ListenerId, ListenerSet, MessageEvent};
use postbridge_core::Message;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One end of a linked pair of in-process channels.
///
/// Delivery is asynchronous: a sent value is handed to the peer's listeners
/// from a task on the current runtime, never from inside `send`.
pub struct MemoryChannel {
    listeners: Arc<ListenerSet>,
    peer: mpsc::UnboundedSender<Value>,
    payload_limit: Option<usize>,
}

/// Create two linked endpoints. Must be called from within a tokio runtime.
pub fn pair() -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
    linked(None)
}

/// Like [`pair`], but `send` rejects messages whose JSON encoding exceeds
/// `limit` bytes.
pub fn pair_with_payload_limit(limit: usize) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
    linked(Some(limit))
}

fn linked(payload_limit: Option<usize>) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
    let (a_inbox, a_listeners) = spawn_inbox();
    let (b_inbox, b_listeners) = spawn_inbox();

    let a = MemoryChannel {
        listeners: a_listeners,
        peer: b_inbox,
        payload_limit,
    };
    let b = MemoryChannel {
        listeners: b_listeners,
        peer: a_inbox,
        payload_limit,
    };
    (Arc::new(a), Arc::new(b))
}

fn spawn_inbox() -> (mpsc::UnboundedSender<Value>, Arc<ListenerSet>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let listeners = Arc::new(ListenerSet::new());
    let dispatch_to = listeners.clone();
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            dispatch_to.dispatch(&MessageEvent::new(data));
        }
    });
    (tx, listeners)
}

impl MemoryChannel {
    /// Deliver an arbitrary value to the peer, bypassing message encoding.
    pub fn post_raw(&self, data: Value) -> Result<(), ChannelError> {
        if let Some(limit) = self.payload_limit {
            let size = serde_json::to_vec(&data)
                .map_err(|e| ChannelError::Rejected(e.to_string()))?
                .len();
            if size > limit {
                return Err(ChannelError::Rejected(format!(
                    "payload of {size} bytes exceeds the {limit} byte limit"
                )));
            }
        }
        self.peer.send(data).map_err(|_| ChannelError::Closed)
    }

    /// Number of listeners currently attached to this end.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Channel for MemoryChannel {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let data = message
            .to_value()
            .map_err(|e| ChannelError::Rejected(e.to_string()))?;
        self.post_raw(data)
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn messages_reach_the_other_end() {
        let (a, b) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.add_listener(Arc::new(move |event: &MessageEvent| {
            let _ = tx.send(event.message().cloned());
        }));

        a.send(&Message::Syn).unwrap();
        a.post_raw(json!({ "unrelated": true })).unwrap();

        assert_eq!(rx.recv().await, Some(Some(Message::Syn)));
        assert_eq!(rx.recv().await, Some(None));
        assert_eq!(a.listener_count(), 0);
    }

    #[tokio::test]
    async fn oversized_payloads_are_rejected() {
        let (a, _b) = pair_with_payload_limit(32);
        let big = Message::SynAck {
            method_names: vec!["x".repeat(64)],
        };
        assert!(matches!(a.send(&big), Err(ChannelError::Rejected(_))));
        assert!(a.send(&Message::Syn).is_ok());
    }
}
