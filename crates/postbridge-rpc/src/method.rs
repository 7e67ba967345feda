//! Locally exposed methods.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use postbridge_core::{MethodTree, RemoteError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Why a local method did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// An error; marshaled so the caller can rebuild it.
    Error(RemoteError),
    /// A plain value, passed to the caller untouched.
    Value(Value),
}

impl<E: std::error::Error + 'static> From<E> for Rejection {
    fn from(err: E) -> Self {
        Self::Error(RemoteError::from_error(&err))
    }
}

pub type MethodResult = Result<Value, Rejection>;

type Handler = dyn Fn(Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync;

/// A method the peer may call.
///
/// Synchronous and asynchronous methods look the same to the call
/// receiver: invoking either yields a future.
#[derive(Clone)]
pub struct LocalMethod(Arc<Handler>);

impl LocalMethod {
    /// Wrap an async function. `f` itself runs when the returned future is
    /// first polled, so a panic before its first await is contained too.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move |args: Vec<Value>| {
            let f = f.clone();
            async move { f(args).await }.boxed()
        }))
    }

    /// Wrap a synchronous function. It still runs when the returned future
    /// is first polled, not at invocation.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move |args: Vec<Value>| {
            let f = f.clone();
            async move { f(args) }.boxed()
        }))
    }

    pub(crate) fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        (self.0)(args)
    }
}

impl fmt::Debug for LocalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalMethod")
    }
}

/// Tree of methods exposed to the peer.
pub type Methods = MethodTree<LocalMethod>;
