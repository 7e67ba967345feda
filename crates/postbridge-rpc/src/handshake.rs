//! Handshake coordination.
//!
//! The responder announces itself with `Syn`; the initiator answers with
//! `SynAck` carrying its method names; the responder's `Ack` carries its own
//! and completes the handshake. The initiator answers every `Syn` and
//! rewires on every `Ack`, so a responder that reloads reconnects onto the
//! same [`RemoteMethods`] object.

use crate::Error;
use crate::channel::{Channel, ChannelError, Listener, ListenerId, MessageEvent};
use crate::connection::{ConnectOptions, Connection, Establishment};
use crate::destructor::Destructor;
use crate::log::{Logger, Side};
use crate::method::{LocalMethod, Methods};
use crate::receiver::{CallReceiver, ReceiverContext};
use crate::remote::RemoteMethods;
use crate::sender::CallSender;
use crate::timeout::TimeoutGuard;
use parking_lot::Mutex;
use postbridge_core::{ConnectionState, FlatMethods, Message};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

type Settle = oneshot::Sender<Result<RemoteMethods, Error>>;

/// State shared by both sides of the handshake for one connection.
pub(crate) struct Session {
    channel: Arc<dyn Channel>,
    destructor: Arc<Destructor>,
    local: Arc<FlatMethods<LocalMethod>>,
    remote: RemoteMethods,
    wiring: Mutex<Option<Wiring>>,
    handshake: Mutex<Option<ListenerId>>,
    settle: Arc<Mutex<Option<Settle>>>,
    guard: Arc<TimeoutGuard>,
    cx: ReceiverContext,
}

/// The call receiver and sender from the latest handshake.
struct Wiring {
    receiver: CallReceiver,
    sender: Arc<CallSender>,
}

impl Wiring {
    fn teardown(&self) {
        self.receiver.teardown();
        self.sender.teardown();
    }
}

impl Session {
    /// Set up the lifecycle for a new connection. Must be called from within
    /// a tokio runtime.
    pub(crate) fn start(
        side: Side,
        channel: Arc<dyn Channel>,
        methods: Methods,
        options: ConnectOptions,
    ) -> (Arc<Self>, Establishment) {
        let runtime = Handle::current();
        let log = Logger::new(side, options.debug);
        let destructor = Arc::new(Destructor::new(log));

        let (tx, rx) = oneshot::channel();
        let settle = Arc::new(Mutex::new(Some(tx)));

        let guard = {
            let destructor = destructor.clone();
            Arc::new(TimeoutGuard::start(&runtime, options.timeout, move |err| {
                destructor.destroy(Some(err))
            }))
        };

        {
            let guard = guard.clone();
            let settle = settle.clone();
            destructor.register(move |error| {
                guard.stop();
                if let Some(tx) = settle.lock().take() {
                    let error = error.cloned().unwrap_or_else(|| {
                        Error::destroyed("Connection destroyed before it was established")
                    });
                    let _ = tx.send(Err(error));
                }
            });
        }

        let session = Arc::new(Self {
            channel,
            destructor,
            local: Arc::new(methods.flatten()),
            remote: RemoteMethods::new(),
            wiring: Mutex::new(None),
            handshake: Mutex::new(None),
            settle,
            guard,
            cx: ReceiverContext {
                runtime,
                log,
                reporter: options.reporter,
            },
        });

        let current = session.clone();
        session.destructor.register(move |_| {
            if let Some(wiring) = current.wiring.lock().take() {
                wiring.teardown();
            }
        });
        (session, Establishment::new(rx))
    }

    /// Attach the handshake listener. `on_message` only sees protocol
    /// messages, and nothing once the connection is destroyed.
    pub(crate) fn listen(
        self: &Arc<Self>,
        on_message: impl Fn(&Arc<Session>, &Message) + Send + Sync + 'static,
    ) {
        let listener: Listener = {
            let session = self.clone();
            Arc::new(move |event: &MessageEvent| {
                if session.destructor.is_destroyed() {
                    return;
                }
                if let Some(message) = event.message() {
                    on_message(&session, message);
                }
            })
        };
        *self.handshake.lock() = Some(self.channel.add_listener(listener));

        let session = self.clone();
        self.destructor.register(move |_| session.stop_listening());
    }

    /// Detach the handshake listener. Calls keep flowing.
    pub(crate) fn stop_listening(&self) {
        if let Some(id) = self.handshake.lock().take() {
            self.channel.remove_listener(id);
        }
    }

    pub(crate) fn log(&self, event: fmt::Arguments<'_>) {
        self.cx.log.log(event);
    }

    pub(crate) fn side(&self) -> Side {
        self.cx.log.side()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.destructor.state()
    }

    pub(crate) fn remote(&self) -> &RemoteMethods {
        &self.remote
    }

    pub(crate) fn local_method_names(&self) -> Vec<String> {
        self.local.keys().cloned().collect()
    }

    pub(crate) fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.channel.send(message)
    }

    pub(crate) fn destroy(&self, error: Option<Error>) {
        self.destructor.destroy(error);
    }

    /// A handshake message could not be sent: report it and give up.
    pub(crate) fn fail(&self, err: ChannelError) {
        self.cx.reporter.report(&err);
        self.destroy(Some(err.into()));
    }

    /// Wire a fresh call receiver and point the remote proxy at the peer's
    /// announced methods. Replaces any wiring from an earlier handshake.
    pub(crate) fn wire(&self, peer_method_names: &[String]) {
        let receiver =
            CallReceiver::connect(self.channel.clone(), self.local.clone(), self.cx.clone());
        let sender = Arc::new(CallSender::new(
            self.channel.clone(),
            self.remote.call_ids(),
            self.cx.log,
        ));
        self.remote.install(peer_method_names, sender.clone());

        let wiring = Wiring { receiver, sender };
        let previous = self.wiring.lock().replace(wiring);
        if let Some(previous) = previous {
            previous.teardown();
        }

        // Destroyed while wiring: the teardown callback has already run.
        if self.destructor.is_destroyed() {
            if let Some(wiring) = self.wiring.lock().take() {
                wiring.teardown();
            }
        }
    }

    /// Resolve the establishment future. Only the first call does anything.
    pub(crate) fn establish(&self) -> bool {
        let Some(tx) = self.settle.lock().take() else {
            return false;
        };
        self.guard.stop();
        self.destructor.mark_established();
        let _ = tx.send(Ok(self.remote.clone()));
        self.log(format_args!("Connection established"));
        true
    }
}

/// Connect as the initiator: wait for the responder's `Syn`, answer with
/// this side's methods, and establish on its `Ack`.
///
/// Must be called from within a tokio runtime.
pub fn connect(
    channel: Arc<dyn Channel>,
    methods: Methods,
    options: ConnectOptions,
) -> Connection {
    let (session, establishment) = Session::start(Side::Initiator, channel, methods, options);

    session.listen(|session, message| match message {
        Message::Syn => {
            session.log(format_args!("Handshake - Received SYN, responding with SYN-ACK"));
            let syn_ack = Message::SynAck {
                method_names: session.local_method_names(),
            };
            if let Err(err) = session.send(&syn_ack) {
                session.cx.reporter.report(&err);
            }
        }
        Message::Ack { method_names } => {
            session.log(format_args!("Handshake - Received ACK"));
            session.wire(method_names);
            session.establish();
        }
        _ => {}
    });
    session.log(format_args!("Awaiting handshake"));

    Connection::new(session, establishment)
}
