//! Cooperative shutdown signaling.
//!
//! A [`Shutdown`] handle is cloned into every long-running task; each loop
//! selects on [`Shutdown::wait`] and exits promptly once the flag is set.
//! Signaling is idempotent and single-threaded (the handle is `Rc`-based,
//! matching the one-event-loop process model).

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::Notify;

struct Inner {
    signalled: Cell<bool>,
    notify: Notify,
}

/// Cooperative shutdown flag shared between tasks on one event loop.
#[derive(Clone)]
pub struct Shutdown {
    inner: Rc<Inner>,
}

impl Shutdown {
    /// Create a fresh, unsignalled handle.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                signalled: Cell::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Set the shutdown flag and wake every waiting task.
    pub fn signal(&self) {
        if !self.inner.signalled.replace(true) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_signalled(&self) -> bool {
        self.inner.signalled.get()
    }

    /// Wait until shutdown is requested. Returns immediately if it already
    /// was.
    pub async fn wait(&self) {
        while !self.inner.signalled.get() {
            let notified = self.inner.notify.notified();
            if self.inner.signalled.get() {
                break;
            }
            notified.await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for an interrupt or terminate signal from the OS.
///
/// On Unix this resolves on SIGINT or SIGTERM; elsewhere on ctrl-c only.
/// Callers typically spawn this and call [`Shutdown::signal`] when it
/// resolves.
pub async fn wait_for_signals() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime")
    }

    #[test]
    fn wait_returns_after_signal() {
        let rt = local_runtime();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let shutdown = Shutdown::new();
            let waiter = shutdown.clone();
            let handle = tokio::task::spawn_local(async move {
                waiter.wait().await;
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!handle.is_finished());
            shutdown.signal();
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter should wake")
                .expect("waiter task");
        });
    }

    #[test]
    fn wait_after_signal_is_immediate() {
        let rt = local_runtime();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let shutdown = Shutdown::new();
            shutdown.signal();
            assert!(shutdown.is_signalled());
            // Must not hang.
            tokio::time::timeout(Duration::from_millis(100), shutdown.wait())
                .await
                .expect("immediate");
        });
    }

    #[test]
    fn signal_is_idempotent() {
        let shutdown = Shutdown::new();
        shutdown.signal();
        shutdown.signal();
        assert!(shutdown.is_signalled());
    }
}
