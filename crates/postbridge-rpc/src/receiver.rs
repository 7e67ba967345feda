//! Incoming calls.
//!
//! Listens for `Call` messages, runs the matching local method on the
//! runtime and sends back a `Reply` once it settles.

use crate::Error;
use crate::channel::{Channel, ChannelError, Listener, ListenerId, MessageEvent};
use crate::connection::ErrorReporter;
use crate::log::Logger;
use crate::method::{LocalMethod, MethodResult, Rejection};
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use postbridge_core::{
    CallId, ErrorCode, FlatMethods, Message, RemoteError, Resolution, serialize_error,
};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;

/// What a receiver needs from its connection.
#[derive(Clone)]
pub(crate) struct ReceiverContext {
    pub(crate) runtime: Handle,
    pub(crate) log: Logger,
    pub(crate) reporter: ErrorReporter,
}

pub(crate) struct CallReceiver {
    channel: Arc<dyn Channel>,
    listener: ListenerId,
    destroyed: Arc<AtomicBool>,
}

impl CallReceiver {
    pub(crate) fn connect(
        channel: Arc<dyn Channel>,
        methods: Arc<FlatMethods<LocalMethod>>,
        cx: ReceiverContext,
    ) -> Self {
        let destroyed = Arc::new(AtomicBool::new(false));
        let listener: Listener = {
            let channel = channel.clone();
            let destroyed = destroyed.clone();
            Arc::new(move |event: &MessageEvent| {
                let Some(Message::Call {
                    id,
                    method_name,
                    args,
                }) = event.message()
                else {
                    return;
                };
                cx.log.log(format_args!("Received {method_name}() call"));

                let invocation = match methods.get(method_name.as_str()) {
                    Some(method) => method.invoke(args.clone()),
                    None => unknown_method(method_name),
                };
                let reply = Reply {
                    id: *id,
                    method_name: method_name.clone(),
                    channel: channel.clone(),
                    destroyed: destroyed.clone(),
                    log: cx.log,
                    reporter: cx.reporter.clone(),
                };
                cx.runtime.spawn(reply.send_when_settled(invocation));
            })
        };
        let listener = channel.add_listener(listener);

        Self {
            channel,
            listener,
            destroyed,
        }
    }

    /// Stop listening for calls and drop replies still being computed.
    pub(crate) fn teardown(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.channel.remove_listener(self.listener);
        }
    }
}

fn unknown_method(method_name: &str) -> BoxFuture<'static, MethodResult> {
    let error = RemoteError::new("Error", format!("{method_name}() is not exposed"))
        .with_code(ErrorCode::MethodNotFound);
    future::ready(Err(Rejection::Error(error))).boxed()
}

struct Reply {
    id: CallId,
    method_name: String,
    channel: Arc<dyn Channel>,
    destroyed: Arc<AtomicBool>,
    log: Logger,
    reporter: ErrorReporter,
}

impl Reply {
    async fn send_when_settled(self, invocation: BoxFuture<'static, MethodResult>) {
        let outcome = AssertUnwindSafe(invocation)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Rejection::Error(panic_error(panic))));

        let method_name = &self.method_name;
        self.log.log(format_args!("Sending {method_name}() reply"));

        if self.destroyed.load(Ordering::Acquire) {
            // The peer may be gone; nobody could observe an error raised here.
            tracing::debug!(
                side = %self.log.side(),
                "Unable to send {method_name}() reply due to destroyed connection"
            );
            return;
        }

        let Err(err) = self.channel.send(&reply_message(self.id, outcome)) else {
            return;
        };

        if let ChannelError::Rejected(_) = &err {
            let transport = Error::from(err.clone()).to_remote();
            let fallback = Message::Reply {
                id: self.id,
                resolution: Resolution::Rejected,
                return_value: error_value(&transport),
                return_value_is_error: true,
            };
            if let Err(second) = self.channel.send(&fallback) {
                self.reporter.report(&second);
            }
        }
        self.reporter.report(&err);
    }
}

fn reply_message(id: CallId, outcome: MethodResult) -> Message {
    let (resolution, return_value, return_value_is_error) = match outcome {
        Ok(value) => (Resolution::Fulfilled, value, false),
        Err(Rejection::Error(error)) => (Resolution::Rejected, error_value(&error), true),
        Err(Rejection::Value(value)) => (Resolution::Rejected, value, false),
    };
    Message::Reply {
        id,
        resolution,
        return_value,
        return_value_is_error,
    }
}

fn error_value(error: &RemoteError) -> Value {
    serde_json::to_value(serialize_error(error))
        .unwrap_or_else(|_| Value::String(error.to_string()))
}

fn panic_error(panic: Box<dyn Any + Send>) -> RemoteError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "method panicked".to_string());
    RemoteError::new("Panic", message)
}
