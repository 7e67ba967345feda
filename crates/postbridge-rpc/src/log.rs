//! Protocol trace, gated by `ConnectOptions::debug`.

use std::fmt;

/// Which end of the handshake a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Initiator,
    Responder,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => f.write_str("Initiator"),
            Self::Responder => f.write_str("Responder"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Logger {
    side: Side,
    enabled: bool,
}

impl Logger {
    pub(crate) fn new(side: Side, enabled: bool) -> Self {
        Self { side, enabled }
    }

    pub(crate) fn side(&self) -> Side {
        self.side
    }

    pub(crate) fn log(&self, event: fmt::Arguments<'_>) {
        if self.enabled {
            tracing::debug!(side = %self.side, "{}", event);
        }
    }
}
