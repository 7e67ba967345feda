use crate::Error;
use crate::channel::ChannelError;
use crate::handshake::Session;
use crate::log::Side;
use crate::remote::RemoteMethods;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use postbridge_core::ConnectionState;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

/// Receives failures that must surface on this host but cannot travel back
/// over the connection, such as a reply the channel refused to carry.
#[derive(Clone)]
pub struct ErrorReporter(Arc<dyn Fn(&ChannelError) + Send + Sync>);

impl ErrorReporter {
    pub fn new(f: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn report(&self, err: &ChannelError) {
        (self.0)(err)
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(|err| tracing::error!("postbridge channel error: {}", err))
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorReporter")
    }
}

/// Options for [`connect`](crate::connect) and
/// [`connect_to_initiator`](crate::connect_to_initiator).
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) debug: bool,
    pub(crate) reporter: ErrorReporter,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroy the connection if the handshake takes longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Emit a `debug` trace of protocol events.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn error_reporter(mut self, f: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.reporter = ErrorReporter::new(f);
        self
    }
}

/// Connection options as they appear in a config document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Handshake bound in milliseconds. Absent means no bound.
    pub timeout_ms: Option<u64>,
    pub debug: bool,
}

impl From<ConnectConfig> for ConnectOptions {
    fn from(config: ConnectConfig) -> Self {
        let options = ConnectOptions::new().debug(config.debug);
        match config.timeout_ms {
            Some(ms) => options.timeout(Duration::from_millis(ms)),
            None => options,
        }
    }
}

/// Resolves with the peer's methods once the handshake completes, or fails
/// with the error that destroyed the connection first. Settles exactly once;
/// clones observe the same outcome.
#[derive(Clone)]
pub struct Establishment(Shared<BoxFuture<'static, Result<RemoteMethods, Error>>>);

impl Establishment {
    pub(crate) fn new(rx: oneshot::Receiver<Result<RemoteMethods, Error>>) -> Self {
        let settled = rx.map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(Error::destroyed("Connection dropped before it was established"))
            })
        });
        Self(settled.boxed().shared())
    }
}

impl Future for Establishment {
    type Output = Result<RemoteMethods, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}

/// A connection to the peer. Created by [`connect`](crate::connect) or
/// [`connect_to_initiator`](crate::connect_to_initiator).
///
/// Listeners registered on the channel keep the connection alive until
/// [`destroy`](Self::destroy) is called.
pub struct Connection {
    session: Arc<Session>,
    establishment: Establishment,
}

impl Connection {
    pub(crate) fn new(session: Arc<Session>, establishment: Establishment) -> Self {
        Self {
            session,
            establishment,
        }
    }

    /// Future for the handshake outcome.
    pub fn establishment(&self) -> Establishment {
        self.establishment.clone()
    }

    /// The peer's methods, once established and until destroyed.
    pub fn remote(&self) -> Option<RemoteMethods> {
        match self.state() {
            ConnectionState::Established => Some(self.session.remote().clone()),
            _ => None,
        }
    }

    /// Tear the connection down. Safe before establishment and idempotent.
    pub fn destroy(&self) {
        self.session.destroy(None);
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn side(&self) -> Side {
        self.session.side()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.side())
            .field("state", &self.state())
            .finish()
    }
}
