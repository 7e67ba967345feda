mod common;

use common::{FakePeer, calculator, names};
use parking_lot::Mutex;
use postbridge_rpc::postbridge_core::{ConnectionState, Message};
use postbridge_rpc::{
    ChannelError, ConnectOptions, Error, LocalMethod, Methods, connect, connect_to_initiator,
    memory,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn nested() -> Methods {
    let mut math = Methods::new();
    math.insert("mul", LocalMethod::sync(|_args: Vec<Value>| Ok(json!(0)))).unwrap();
    let mut methods = Methods::new()
        .with("add", LocalMethod::sync(|_args: Vec<Value>| Ok(json!(0))))
        .unwrap();
    methods.nest("math", math).unwrap();
    methods
}

/// Options whose error reporter records into the returned list.
fn reporting() -> (ConnectOptions, Arc<Mutex<Vec<ChannelError>>>) {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    let options = ConnectOptions::new().error_reporter(move |err| sink.lock().push(err.clone()));
    (options, reported)
}

/// Methods with one name too long for a small payload limit.
fn long_named() -> Methods {
    Methods::new()
        .with(&"x".repeat(80), LocalMethod::sync(|_args: Vec<Value>| Ok(json!(0))))
        .unwrap()
}

#[tokio::test]
async fn initiator_answers_every_syn_with_flattened_names() {
    let (local, peer) = memory::pair();
    let connection = connect(local, nested(), ConnectOptions::new());
    let mut peer = FakePeer::attach(peer);

    for _ in 0..2 {
        peer.send(Message::Syn);
        assert_eq!(
            peer.recv().await,
            Message::SynAck {
                method_names: names(&["add", "math.mul"])
            }
        );
    }
    assert_eq!(connection.state(), ConnectionState::Awaiting);
    assert!(connection.remote().is_none());
}

#[tokio::test]
async fn ack_establishes_the_connection() {
    let (local, peer) = memory::pair();
    let connection = connect(local, Methods::new(), ConnectOptions::new());
    let mut peer = FakePeer::attach(peer);

    peer.send(Message::Syn);
    peer.recv().await;
    peer.send(Message::Ack {
        method_names: names(&["ping", "ns.pong"]),
    });

    let remote = connection.establishment().await.unwrap();
    assert_eq!(remote.method_names(), ["ns.pong", "ping"]);
    assert_eq!(connection.state(), ConnectionState::Established);
    assert!(connection.remote().unwrap().same_object(&remote));

    // Settled once; later awaits observe the same outcome.
    let again = connection.establishment().await.unwrap();
    assert!(again.same_object(&remote));
}

#[tokio::test]
async fn reconnection_rewires_the_same_remote_object() {
    let (local, peer) = memory::pair();
    let connection = connect(local, Methods::new(), ConnectOptions::new());
    let mut peer = FakePeer::attach(peer);

    peer.send(Message::Syn);
    peer.recv().await;
    peer.send(Message::Ack {
        method_names: names(&["a", "c"]),
    });
    let remote = connection.establishment().await.unwrap();
    let stale = remote.method("c").unwrap();

    peer.send(Message::Syn);
    peer.recv().await;
    peer.send(Message::Ack {
        method_names: names(&["a", "b"]),
    });
    common::settle().await;

    assert!(connection.remote().unwrap().same_object(&remote));
    assert_eq!(remote.method_names(), ["a", "b"]);
    assert_eq!(stale.call(vec![]).await, Err(Error::UnknownMethod("c".into())));

    let call = remote.call("b", vec![json!(1)]);
    let (id, method_name, args) = peer.recv_call().await;
    assert_eq!(method_name, "b");
    assert_eq!(args, [json!(1)]);
    peer.reply(id, json!("ok"));
    assert_eq!(call.await, Ok(json!("ok")));
}

#[tokio::test(start_paused = true)]
async fn handshake_times_out() {
    let (local, peer) = memory::pair();
    let connection = connect(
        local,
        Methods::new(),
        ConnectOptions::new().timeout(Duration::from_millis(100)),
    );
    let mut peer = FakePeer::attach(peer);

    let err = connection.establishment().await.unwrap_err();
    assert_eq!(err, Error::ConnectionTimeout { millis: 100 });
    assert_eq!(connection.state(), ConnectionState::Destroyed);

    // A destroyed initiator no longer answers.
    peer.send(Message::Syn);
    peer.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn established_connections_outlive_the_timeout() {
    let (local, peer) = memory::pair();
    let connection = connect(
        local,
        Methods::new(),
        ConnectOptions::new().timeout(Duration::from_millis(100)),
    );
    let mut peer = FakePeer::attach(peer);

    peer.send(Message::Syn);
    peer.recv().await;
    peer.send(Message::Ack { method_names: vec![] });
    connection.establishment().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connection.state(), ConnectionState::Established);
}

#[tokio::test]
async fn destroy_before_establishment_rejects() {
    let (local, peer) = memory::pair();
    let connection = connect(local.clone(), Methods::new(), ConnectOptions::new());
    let mut peer = FakePeer::attach(peer);

    connection.destroy();
    connection.destroy();

    let err = connection.establishment().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionDestroyed(_)));
    assert_eq!(local.listener_count(), 0);

    peer.send(Message::Syn);
    peer.assert_quiet().await;
}

#[tokio::test]
async fn unrelated_traffic_is_ignored() {
    let (local, peer) = memory::pair();
    let connection = connect(local, Methods::new(), ConnectOptions::new());
    let mut peer = FakePeer::attach(peer);

    peer.channel.post_raw(json!({ "hello": "world" })).unwrap();
    peer.channel.post_raw(json!({ "postbridge": "bogus" })).unwrap();
    peer.channel.post_raw(json!("syn")).unwrap();
    peer.assert_quiet().await;
    assert_eq!(connection.state(), ConnectionState::Awaiting);

    peer.send(Message::Syn);
    assert!(matches!(peer.recv().await, Message::SynAck { .. }));
}

#[tokio::test]
async fn responder_sends_syn_then_acks_the_first_syn_ack() {
    let (local, peer) = memory::pair();
    let mut peer = FakePeer::attach(peer);
    let connection = connect_to_initiator(local, calculator(), ConnectOptions::new());

    assert_eq!(peer.recv().await, Message::Syn);
    peer.send(Message::SynAck {
        method_names: names(&["echo"]),
    });
    assert_eq!(
        peer.recv().await,
        Message::Ack {
            method_names: names(&["add", "fail"])
        }
    );

    let remote = connection.establishment().await.unwrap();
    assert_eq!(remote.method_names(), ["echo"]);
    assert_eq!(connection.state(), ConnectionState::Established);

    // Only the first SYN-ACK counts.
    peer.send(Message::SynAck {
        method_names: names(&["other"]),
    });
    peer.assert_quiet().await;
    assert_eq!(remote.method_names(), ["echo"]);
}

#[tokio::test(start_paused = true)]
async fn responder_times_out_without_an_initiator() {
    let (local, _peer) = memory::pair();
    let connection = connect_to_initiator(
        local,
        Methods::new(),
        ConnectOptions::new().timeout(Duration::from_millis(250)),
    );

    let err = connection.establishment().await.unwrap_err();
    assert_eq!(err, Error::ConnectionTimeout { millis: 250 });
}

#[tokio::test]
async fn both_sides_establish_over_a_pair() {
    let (a, b) = memory::pair();
    let initiator = connect(a, nested(), ConnectOptions::new().debug(true));
    let responder = connect_to_initiator(b, calculator(), ConnectOptions::new().debug(true));

    let to_initiator = responder.establishment().await.unwrap();
    let to_responder = initiator.establishment().await.unwrap();
    assert_eq!(to_initiator.method_names(), ["add", "math.mul"]);
    assert_eq!(to_responder.method_names(), ["add", "fail"]);
    assert!(to_initiator.tree().get("math.mul").is_some());
}

#[tokio::test]
async fn rejected_syn_destroys_the_responder() {
    let (local, _peer) = memory::pair_with_payload_limit(4);
    let (options, reported) = reporting();
    let connection = connect_to_initiator(local, Methods::new(), options);

    let err = connection.establishment().await.unwrap_err();
    assert_eq!(
        err,
        Error::TransportRejected("payload of 20 bytes exceeds the 4 byte limit".into())
    );
    assert_eq!(connection.state(), ConnectionState::Destroyed);
    assert_eq!(reported.lock().len(), 1);
}

#[tokio::test]
async fn rejected_ack_destroys_the_responder() {
    let (local, peer) = memory::pair_with_payload_limit(64);
    let mut peer = FakePeer::attach(peer);
    let (options, reported) = reporting();
    let connection = connect_to_initiator(local.clone(), long_named(), options);

    assert_eq!(peer.recv().await, Message::Syn);
    peer.send(Message::SynAck {
        method_names: names(&["echo"]),
    });

    let err = connection.establishment().await.unwrap_err();
    assert!(matches!(err, Error::TransportRejected(_)), "got {err:?}");
    assert_eq!(connection.state(), ConnectionState::Destroyed);
    assert!(connection.remote().is_none());
    assert_eq!(local.listener_count(), 0);
    assert!(matches!(reported.lock()[..], [ChannelError::Rejected(_)]));
    peer.assert_quiet().await;
}

#[tokio::test]
async fn rejected_syn_ack_is_reported_and_the_initiator_keeps_waiting() {
    let (local, peer) = memory::pair_with_payload_limit(64);
    let (options, reported) = reporting();
    let connection = connect(local, long_named(), options);
    let mut peer = FakePeer::attach(peer);

    peer.send(Message::Syn);
    peer.assert_quiet().await;

    assert!(matches!(reported.lock()[..], [ChannelError::Rejected(_)]));
    assert_eq!(connection.state(), ConnectionState::Awaiting);
    assert!(connection.remote().is_none());
}
