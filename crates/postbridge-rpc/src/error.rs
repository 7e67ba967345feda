use crate::channel::ChannelError;
use postbridge_core::{ErrorCode, RemoteError};
use serde_json::Value;

/// Errors surfaced by a connection or by a remote call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The handshake did not complete within the configured bound.
    #[error("connection timed out after {millis}ms")]
    ConnectionTimeout { millis: u64 },
    /// The operation was attempted after teardown.
    #[error("{0}")]
    ConnectionDestroyed(String),
    /// The channel refused to carry a payload.
    #[error("transport rejected message: {0}")]
    TransportRejected(String),
    /// The remote method failed with an error.
    #[error("remote method failed: {0}")]
    RemoteExecution(RemoteError),
    /// The remote method rejected with a value that is not an error.
    #[error("remote method rejected with {0}")]
    RemoteRejection(Value),
    /// The peer does not currently expose this key-path.
    #[error("remote does not expose {0}()")]
    UnknownMethod(String),
}

impl Error {
    pub(crate) fn destroyed(message: impl Into<String>) -> Self {
        Self::ConnectionDestroyed(message.into())
    }

    /// Protocol code for errors the library raises itself.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::ConnectionTimeout { .. } => Some(ErrorCode::ConnectionTimeout),
            Self::ConnectionDestroyed(_) => Some(ErrorCode::ConnectionDestroyed),
            Self::TransportRejected(_) => Some(ErrorCode::TransportRejected),
            Self::UnknownMethod(_) => Some(ErrorCode::MethodNotFound),
            Self::RemoteExecution(_) | Self::RemoteRejection(_) => None,
        }
    }

    /// The error as it would be marshaled for the peer.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::RemoteExecution(remote) => remote.clone(),
            other => {
                let name = other.code().map_or("Error", ErrorCode::as_str);
                let mut remote = RemoteError::new(name, other.to_string());
                remote.code = other.code().map(|code| code.to_string());
                remote
            }
        }
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Rejected(reason) => Self::TransportRejected(reason),
            ChannelError::Closed => Self::destroyed("channel closed"),
            ChannelError::InvalidFrame(reason) => Self::TransportRejected(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_errors_carry_protocol_codes() {
        let timeout = Error::ConnectionTimeout { millis: 100 };
        assert_eq!(timeout.code(), Some(ErrorCode::ConnectionTimeout));
        assert_eq!(timeout.to_string(), "connection timed out after 100ms");

        let remote = timeout.to_remote();
        assert_eq!(remote.name, "ConnectionTimeout");
        assert!(remote.has_code(ErrorCode::ConnectionTimeout));
    }

    #[test]
    fn channel_rejection_maps_to_transport_rejected() {
        let err: Error = ChannelError::Rejected("too big".into()).into();
        assert_eq!(err, Error::TransportRejected("too big".into()));
    }
}
