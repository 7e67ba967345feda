use crate::channel::Channel;
use crate::connection::{ConnectOptions, Connection};
use crate::handshake::Session;
use crate::log::Side;
use crate::method::Methods;
use postbridge_core::{ConnectionState, Message};
use std::sync::Arc;

/// Connect as the responder: announce with `Syn`, then wire up and answer
/// with `Ack` on the initiator's first `SynAck`.
///
/// A responder connects once. To reconnect, create a new connection; the
/// initiator rewires onto the same remote object.
///
/// Must be called from within a tokio runtime.
pub fn connect_to_initiator(
    channel: Arc<dyn Channel>,
    methods: Methods,
    options: ConnectOptions,
) -> Connection {
    let (session, establishment) = Session::start(Side::Responder, channel, methods, options);

    session.listen(|session, message| {
        let Message::SynAck { method_names } = message else {
            return;
        };
        if session.state() != ConnectionState::Awaiting {
            return;
        }
        session.log(format_args!("Handshake - Received SYN-ACK, responding with ACK"));

        session.wire(method_names);
        let ack = Message::Ack {
            method_names: session.local_method_names(),
        };
        if let Err(err) = session.send(&ack) {
            session.fail(err);
            return;
        }
        session.establish();
        session.stop_listening();
    });

    session.log(format_args!("Handshake - Sending SYN"));
    if let Err(err) = session.send(&Message::Syn) {
        session.fail(err);
    }

    Connection::new(session, establishment)
}
