//! The proxy object handed to callers.
//!
//! [`RemoteMethods`] keeps its identity for the whole life of a connection.
//! When the peer reconnects and announces a new method list, only the
//! dispatch table behind it is swapped; handles held by callers keep working
//! for every key-path the peer still exposes.

use crate::Error;
use crate::sender::{CallIds, CallSender};
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use parking_lot::RwLock;
use postbridge_core::MethodTree;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Methods exposed by the peer.
#[derive(Clone)]
pub struct RemoteMethods {
    inner: Arc<Dispatch>,
}

struct Dispatch {
    ids: Arc<CallIds>,
    table: RwLock<Table>,
}

#[derive(Default)]
struct Table {
    sender: Option<Arc<CallSender>>,
    /// Leaves hold their own key-path.
    tree: MethodTree<String>,
}

impl RemoteMethods {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Dispatch {
                ids: Arc::new(CallIds::new()),
                table: RwLock::new(Table::default()),
            }),
        }
    }

    pub(crate) fn call_ids(&self) -> Arc<CallIds> {
        self.inner.ids.clone()
    }

    /// Point every key-path in `method_names` at `sender`, dropping the ones
    /// the peer no longer announces.
    pub(crate) fn install(&self, method_names: &[String], sender: Arc<CallSender>) {
        let announced: BTreeSet<&str> = method_names.iter().map(String::as_str).collect();
        let mut table = self.inner.table.write();

        for stale in table.tree.paths() {
            if !announced.contains(stale.as_str()) {
                table.tree.remove(&stale);
            }
        }
        for name in &announced {
            if let Err(err) = table.tree.insert(name, (*name).to_string()) {
                tracing::warn!("Ignoring remote method {name:?}: {err}");
            }
        }
        table.sender = Some(sender);
    }

    /// Call the remote method at `key_path`.
    pub fn call(
        &self,
        key_path: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, Error>> {
        let sender = {
            let table = self.inner.table.read();
            match (&table.sender, table.tree.get(key_path)) {
                (Some(sender), Some(_)) => sender.clone(),
                _ => {
                    let err = Error::UnknownMethod(key_path.to_string());
                    return future::ready(Err(err)).boxed();
                }
            }
        };
        sender.call(key_path, args)
    }

    /// A stable handle to the method at `key_path`, if the peer exposes it.
    pub fn method(&self, key_path: &str) -> Option<RemoteMethod> {
        let table = self.inner.table.read();
        table.tree.get(key_path).map(|path| RemoteMethod {
            path: path.clone(),
            remote: self.clone(),
        })
    }

    /// Key-paths the peer currently exposes, sorted.
    pub fn method_names(&self) -> Vec<String> {
        self.inner.table.read().tree.paths()
    }

    /// Nested view of the peer's methods, in the shape the peer declared.
    pub fn tree(&self) -> MethodTree<RemoteMethod> {
        let paths = self.method_names();
        // Paths come from a valid tree, so rebuilding cannot conflict.
        MethodTree::unflatten(&paths, |path| RemoteMethod {
            path: path.to_string(),
            remote: self.clone(),
        })
        .unwrap_or_default()
    }

    /// Whether both values are the same proxy object.
    pub fn same_object(&self, other: &RemoteMethods) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RemoteMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethods")
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Handle to one remote method.
///
/// Resolves through the connection's current wiring at call time.
#[derive(Clone)]
pub struct RemoteMethod {
    path: String,
    remote: RemoteMethods,
}

impl RemoteMethod {
    pub fn key_path(&self) -> &str {
        &self.path
    }

    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, Result<Value, Error>> {
        self.remote.call(&self.path, args)
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteMethod({})", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Logger, Side};
    use crate::memory;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reinstall_swaps_methods_in_place() {
        let (channel, _peer) = memory::pair();
        let remote = RemoteMethods::new();
        let log = Logger::new(Side::Initiator, false);

        let first = Arc::new(CallSender::new(channel.clone(), remote.call_ids(), log));
        remote.install(&names(&["a", "c", "ns.x"]), first);
        let handle = remote.clone();
        let stale = remote.method("c").unwrap();

        let second = Arc::new(CallSender::new(channel, remote.call_ids(), log));
        remote.install(&names(&["a", "b", "ns.y"]), second);

        assert!(handle.same_object(&remote));
        assert_eq!(handle.method_names(), ["a", "b", "ns.y"]);
        assert_eq!(
            stale.call(vec![]).await,
            Err(Error::UnknownMethod("c".into()))
        );
    }

    #[tokio::test]
    async fn tree_follows_the_declared_nesting() {
        let (channel, _peer) = memory::pair();
        let remote = RemoteMethods::new();
        let sender = Arc::new(CallSender::new(
            channel,
            remote.call_ids(),
            Logger::new(Side::Responder, false),
        ));
        remote.install(&names(&["math.add", "math.sub", "ping"]), sender);

        let tree = remote.tree();
        assert_eq!(tree.get("math.add").map(RemoteMethod::key_path), Some("math.add"));
        assert_eq!(tree.nodes().count(), 2);
    }

    #[test]
    fn calls_before_install_are_unknown() {
        let remote = RemoteMethods::new();
        assert!(remote.method("anything").is_none());
        assert!(remote.method_names().is_empty());
    }
}
