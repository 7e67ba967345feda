//! Connection engine for postbridge.
//!
//! Two contexts joined by a [`Channel`] run a three-message handshake and
//! then call each other's methods as if they were local:
//!
//! - The initiator calls [`connect`] and waits for a `Syn`.
//! - The responder calls [`connect_to_initiator`], which sends it.
//!
//! Both return a [`Connection`] whose [`Establishment`] resolves to the
//! peer's [`RemoteMethods`].
//!
//! ```no_run
//! use postbridge_rpc::{ConnectOptions, LocalMethod, Methods, memory};
//! use serde_json::{Value, json};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (a, b) = memory::pair();
//!
//! let methods = Methods::new().with("add", LocalMethod::sync(|args: Vec<Value>| {
//!     let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
//!     Ok(json!(sum))
//! }))?;
//! let initiator = postbridge_rpc::connect(a, methods, ConnectOptions::new());
//! let responder = postbridge_rpc::connect_to_initiator(
//!     b,
//!     Methods::new(),
//!     ConnectOptions::new().timeout(Duration::from_secs(5)),
//! );
//!
//! let remote = responder.establishment().await?;
//! assert_eq!(remote.call("add", vec![json!(2), json!(3)]).await?, json!(5));
//! # drop(initiator);
//! # Ok(())
//! # }
//! ```

mod channel;
mod connection;
mod destructor;
mod error;
mod handshake;
mod log;
pub mod memory;
mod method;
mod receiver;
mod remote;
mod responder;
mod sender;
mod timeout;

pub use channel::{Channel, ChannelError, Listener, ListenerId, ListenerSet, MessageEvent};
pub use connection::{ConnectConfig, ConnectOptions, Connection, ErrorReporter, Establishment};
pub use error::Error;
pub use handshake::connect;
pub use log::Side;
pub use method::{LocalMethod, MethodResult, Methods, Rejection};
pub use remote::{RemoteMethod, RemoteMethods};
pub use responder::connect_to_initiator;

pub use postbridge_core;
pub use postbridge_core::{ConnectionState, RemoteError};
