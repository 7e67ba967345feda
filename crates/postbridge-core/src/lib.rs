//! Core types for postbridge.
//!
//! This crate provides the protocol primitives shared by both ends of a
//! connection: the wire messages, the transportable error record, and the
//! method trees that are flattened into key-paths for the handshake. It has
//! no runtime dependency; the connection engine lives in `postbridge-rpc`.

mod error;
mod message;
mod methods;

pub use error::{ErrorCode, RemoteError, SerializedError, deserialize_error, serialize_error};
pub use message::{CallId, Message, PROTOCOL_TAG, Resolution};
pub use methods::{FlatMethods, MethodNode, MethodTree, MethodTreeError};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Handshake in progress.
    #[default]
    Awaiting,
    /// Handshake completed at least once; calls may flow.
    Established,
    /// Torn down. Irrevocable.
    Destroyed,
}

impl ConnectionState {
    /// Whether the connection has been torn down.
    pub fn is_destroyed(self) -> bool {
        self == Self::Destroyed
    }
}
