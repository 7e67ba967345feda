//! Outgoing calls.
//!
//! Each call registers its own one-shot reply listener filtering on its call
//! id, sends the `Call`, and settles when the matching `Reply` arrives. A
//! reply that never comes leaves the call pending; callers wanting a bound
//! wrap the future in their own timeout.

use crate::Error;
use crate::channel::{Channel, Listener, ListenerId, MessageEvent};
use crate::log::Logger;
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use postbridge_core::{
    CallId, Message, Resolution, SerializedError, deserialize_error, serialize_error,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

/// Call id source shared by every wiring of one connection, so ids stay
/// unique across reconnection.
#[derive(Debug)]
pub(crate) struct CallIds(AtomicU64);

impl CallIds {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> CallId {
        CallId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct CallSender {
    channel: Arc<dyn Channel>,
    ids: Arc<CallIds>,
    destroyed: AtomicBool,
    log: Logger,
}

impl CallSender {
    pub(crate) fn new(channel: Arc<dyn Channel>, ids: Arc<CallIds>, log: Logger) -> Self {
        log.log(format_args!("Connecting call sender"));
        Self {
            channel,
            ids,
            destroyed: AtomicBool::new(false),
            log,
        }
    }

    /// Refuse further calls. Calls already in flight keep waiting.
    pub(crate) fn teardown(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// Send a `Call` for `method_name`.
    ///
    /// The destroyed check, listener registration and send all happen before
    /// this returns; only the wait for the reply is deferred.
    pub(crate) fn call(
        &self,
        method_name: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, Error>> {
        self.log.log(format_args!("Sending {method_name}() call"));

        if self.destroyed.load(Ordering::Acquire) {
            return future::ready(Err(Error::destroyed(format!(
                "Unable to send {method_name}() call due to destroyed connection"
            ))))
            .boxed();
        }

        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(PendingReply {
            id,
            reply: Mutex::new(Some(tx)),
            listener: Mutex::new(None),
            channel: Arc::downgrade(&self.channel),
        });

        let listener: Listener = {
            let pending = pending.clone();
            Arc::new(move |event: &MessageEvent| pending.on_event(event))
        };
        let listener_id = self.channel.add_listener(listener);
        *pending.listener.lock() = Some(listener_id);

        let message = Message::Call {
            id,
            method_name: method_name.to_string(),
            args,
        };
        if let Err(err) = self.channel.send(&message) {
            self.channel.remove_listener(listener_id);
            return future::ready(Err(Error::from(err))).boxed();
        }

        let log = self.log;
        let method_name = method_name.to_string();
        async move {
            let (resolution, value, is_error) = rx.await.map_err(|_| {
                Error::destroyed(format!("Channel closed before {method_name}() replied"))
            })?;
            log.log(format_args!("Received {method_name}() reply"));
            settle(resolution, value, is_error)
        }
        .boxed()
    }
}

type Settled = (Resolution, Value, bool);

struct PendingReply {
    id: CallId,
    reply: Mutex<Option<oneshot::Sender<Settled>>>,
    listener: Mutex<Option<ListenerId>>,
    channel: Weak<dyn Channel>,
}

impl PendingReply {
    fn on_event(&self, event: &MessageEvent) {
        let Some(Message::Reply {
            id,
            resolution,
            return_value,
            return_value_is_error,
        }) = event.message()
        else {
            return;
        };
        if *id != self.id {
            return;
        }
        let Some(reply) = self.reply.lock().take() else {
            return;
        };

        let listener = self.listener.lock().take();
        if let (Some(channel), Some(listener)) = (self.channel.upgrade(), listener) {
            channel.remove_listener(listener);
        }
        let _ = reply.send((*resolution, return_value.clone(), *return_value_is_error));
    }
}

/// Turn a reply into the call's outcome. A value flagged as an error is
/// rebuilt through the error record whichever way it resolved.
fn settle(resolution: Resolution, value: Value, is_error: bool) -> Result<Value, Error> {
    let rebuilt = if is_error {
        serde_json::from_value::<SerializedError>(value.clone())
            .ok()
            .map(deserialize_error)
    } else {
        None
    };
    match (resolution, rebuilt) {
        (Resolution::Fulfilled, Some(error)) => {
            Ok(serde_json::to_value(serialize_error(&error)).unwrap_or(value))
        }
        (Resolution::Fulfilled, None) => Ok(value),
        (Resolution::Rejected, Some(error)) => Err(Error::RemoteExecution(error)),
        (Resolution::Rejected, None) => Err(Error::RemoteRejection(value)),
    }
}
