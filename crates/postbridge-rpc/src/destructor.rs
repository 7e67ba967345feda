//! Per-connection teardown registry.
//!
//! Owns the connection's [`ConnectionState`]. Every component that holds a
//! resource (a listener, a timer, a pending establishment) registers a
//! callback here; [`Destructor::destroy`] runs them all exactly once.

use crate::Error;
use crate::log::Logger;
use parking_lot::Mutex;
use postbridge_core::ConnectionState;
use std::panic::{AssertUnwindSafe, catch_unwind};

type Callback = Box<dyn FnOnce(Option<&Error>) + Send>;

pub(crate) struct Destructor {
    log: Logger,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    callbacks: Vec<Callback>,
}

impl Destructor {
    pub(crate) fn new(log: Logger) -> Self {
        Self {
            log,
            inner: Mutex::new(Inner {
                state: ConnectionState::Awaiting,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Queue a teardown callback. It receives the error that caused the
    /// teardown, if any.
    pub(crate) fn register(&self, callback: impl FnOnce(Option<&Error>) + Send + 'static) {
        self.inner.lock().callbacks.push(Box::new(callback));
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state().is_destroyed()
    }

    /// Move from `Awaiting` to `Established`. Returns false in any other state.
    pub(crate) fn mark_established(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Awaiting {
            return false;
        }
        inner.state = ConnectionState::Established;
        true
    }

    /// Tear the connection down. Only the first call has any effect.
    ///
    /// Callbacks run in registration order, outside the lock. A panicking
    /// callback is logged and the remaining ones still run.
    pub(crate) fn destroy(&self, error: Option<Error>) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state.is_destroyed() {
                return;
            }
            inner.state = ConnectionState::Destroyed;
            std::mem::take(&mut inner.callbacks)
        };

        match &error {
            Some(err) => self.log.log(format_args!("Destroying connection: {err}")),
            None => self.log.log(format_args!("Destroying connection")),
        }

        for callback in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(error.as_ref())));
            if outcome.is_err() {
                tracing::error!(side = %self.log.side(), "teardown callback panicked");
            }
        }
    }
}
