#![allow(dead_code)]

use postbridge_rpc::postbridge_core::{CallId, Message, Resolution};
use postbridge_rpc::{
    Channel, LocalMethod, MessageEvent, Methods, Rejection, RemoteError, memory::MemoryChannel,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A hand-driven peer: sends raw protocol messages and records everything
/// it receives.
pub struct FakePeer {
    pub channel: Arc<MemoryChannel>,
    inbox: mpsc::UnboundedReceiver<Message>,
}

impl FakePeer {
    pub fn attach(channel: Arc<MemoryChannel>) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        channel.add_listener(Arc::new(move |event: &MessageEvent| {
            if let Some(message) = event.message() {
                let _ = tx.send(message.clone());
            }
        }));
        Self { channel, inbox }
    }

    pub fn send(&self, message: Message) {
        self.channel.send(&message).unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("peer channel closed")
    }

    /// Assert nothing further arrives once pending deliveries have run.
    pub async fn assert_quiet(&mut self) {
        settle().await;
        assert_eq!(self.inbox.try_recv().ok(), None);
    }

    pub async fn recv_call(&mut self) -> (CallId, String, Vec<Value>) {
        match self.recv().await {
            Message::Call {
                id,
                method_name,
                args,
            } => (id, method_name, args),
            other => panic!("expected a call, got {other:?}"),
        }
    }

    pub async fn recv_reply(&mut self) -> (CallId, Resolution, Value, bool) {
        match self.recv().await {
            Message::Reply {
                id,
                resolution,
                return_value,
                return_value_is_error,
            } => (id, resolution, return_value, return_value_is_error),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    pub fn reply(&self, id: CallId, value: Value) {
        self.send(Message::Reply {
            id,
            resolution: Resolution::Fulfilled,
            return_value: value,
            return_value_is_error: false,
        });
    }
}

/// Let spawned delivery and reply tasks run.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn calculator() -> Methods {
    Methods::new()
        .with(
            "add",
            LocalMethod::sync(|args: Vec<Value>| {
                Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
            }),
        )
        .unwrap()
        .with(
            "fail",
            LocalMethod::new(|_args: Vec<Value>| async {
                Err::<Value, _>(Rejection::Error(RemoteError::new("Error", "boom")))
            }),
        )
        .unwrap()
}
