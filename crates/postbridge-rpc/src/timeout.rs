use crate::Error;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// One-shot timer bounding the handshake.
pub(crate) struct TimeoutGuard {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutGuard {
    /// Schedule `on_timeout` after `timeout`. `None` disables the guard.
    pub(crate) fn start(
        runtime: &Handle,
        timeout: Option<Duration>,
        on_timeout: impl FnOnce(Error) + Send + 'static,
    ) -> Self {
        let task = timeout.map(|timeout| {
            let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                on_timeout(Error::ConnectionTimeout { millis });
            })
        });
        Self {
            task: Mutex::new(task),
        }
    }

    /// Cancel the timer. Safe to repeat, and a no-op once it has fired.
    pub(crate) fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
