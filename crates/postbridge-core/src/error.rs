//! Error marshaling.
//!
//! A failed remote method travels as a [`SerializedError`]: a flat record with
//! `name`, `message`, `stack`, an optional protocol `code`, and any custom
//! fields flattened beside them. The receiving side rebuilds a
//! [`RemoteError`] carrying the same fields. It is a copy, not the original
//! error value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;

/// Protocol-level error codes attached to errors the library itself raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConnectionDestroyed,
    ConnectionTimeout,
    TransportRejected,
    MethodNotFound,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionDestroyed => "ConnectionDestroyed",
            Self::ConnectionTimeout => "ConnectionTimeout",
            Self::TransportRejected => "TransportRejected",
            Self::MethodNotFound => "MethodNotFound",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transportable form of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Custom fields, flattened next to the fixed ones on the wire.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_name() -> String {
    "Error".to_string()
}

/// An error raised by the peer, rebuilt from its [`SerializedError`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    /// Plain settable field; Rust errors have no native stack to restore.
    pub stack: String,
    pub code: Option<String>,
    pub extra: Map<String, Value>,
}

impl RemoteError {
    /// Create an error with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        Self {
            stack: format!("{name}: {message}"),
            name,
            message,
            code: None,
            extra: Map::new(),
        }
    }

    /// Attach a protocol or application error code.
    pub fn with_code(mut self, code: impl fmt::Display) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Attach a custom field that travels with the error.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Capture any error as a `RemoteError`.
    ///
    /// The name is the error's type name and the stack lists the chain of
    /// sources. A `RemoteError` is copied as-is.
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        if let Some(remote) = (err as &dyn Any).downcast_ref::<RemoteError>() {
            return remote.clone();
        }

        let mut error = Self::new(short_type_name::<E>(), err.to_string());
        let mut source = err.source();
        while let Some(cause) = source {
            error.stack.push_str("\n    caused by: ");
            error.stack.push_str(&cause.to_string());
            source = cause.source();
        }
        error
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code.as_str())
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Copy an error into its transportable form.
pub fn serialize_error(error: &RemoteError) -> SerializedError {
    SerializedError {
        name: error.name.clone(),
        message: error.message.clone(),
        stack: error.stack.clone(),
        code: error.code.clone(),
        extra: error.extra.clone(),
    }
}

/// Rebuild an error from its transportable form.
pub fn deserialize_error(record: SerializedError) -> RemoteError {
    RemoteError {
        name: record.name,
        message: record.message,
        stack: record.stack,
        code: record.code,
        extra: record.extra,
    }
}

impl From<SerializedError> for RemoteError {
    fn from(record: SerializedError) -> Self {
        deserialize_error(record)
    }
}

impl From<&RemoteError> for SerializedError {
    fn from(error: &RemoteError) -> Self {
        serialize_error(error)
    }
}
