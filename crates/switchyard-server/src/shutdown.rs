//! Graceful shutdown signal handling.
//!
//! Two pieces cooperate during a drain:
//!
//! - [`ShutdownSignal`] tells the accept loop and every connection task that
//!   the server is shutting down. It can be triggered programmatically or by
//!   SIGINT/SIGTERM.
//! - [`InFlightTracker`] counts live connections so the supervisor can tell
//!   when draining is complete.
//!
//! # Example
//!
//! ```rust
//! use switchyard_server::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let for_worker = shutdown.clone();
//!
//! shutdown.trigger();
//! assert!(for_worker.is_shutdown());
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

/// A signal that can be used to trigger and await graceful shutdown.
///
/// Clones share state: triggering any clone notifies all of them.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers the signal. Idempotent.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // no receivers is fine
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when shutdown is triggered.
    ///
    /// Completes immediately if the signal was already triggered. The
    /// subscription is taken when this is called, not when first polled.
    pub fn recv(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        let triggered = Arc::clone(&self.triggered);
        async move {
            if triggered.load(Ordering::SeqCst) {
                return;
            }
            // a closed channel means every signal handle is gone
            let _ = receiver.recv().await;
        }
    }

    /// Creates a signal that is triggered by SIGINT or SIGTERM (Ctrl+C
    /// outside Unix).
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be registered.
    pub fn with_os_signals() -> std::io::Result<Self> {
        let signals = OsSignals::register()?;
        let signal = Self::new();
        let signal_clone = signal.clone();

        tokio::spawn(async move {
            match signals.recv().await {
                Ok(name) => {
                    tracing::info!(signal = name, "Received signal, initiating graceful shutdown");
                    signal_clone.trigger();
                }
                Err(e) => tracing::error!(error = %e, "Failed to wait for shutdown signal"),
            }
        });

        Ok(signal)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered OS signal streams.
struct OsSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl OsSignals {
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            _ = self.sigterm.recv() => Ok("SIGTERM"),
            _ = self.sigint.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}

/// Counts in-flight connections during shutdown.
///
/// Each accepted connection holds an [`InFlightToken`]; when every token is
/// dropped, [`InFlightTracker::wait_idle`] completes.
///
/// # Example
///
/// ```rust
/// use switchyard_server::InFlightTracker;
///
/// let tracker = InFlightTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.in_flight(), 1);
///
/// drop(token);
/// assert_eq!(tracker.in_flight(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl InFlightTracker {
    /// Creates a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Acquires a token, held for the lifetime of one connection.
    #[must_use]
    pub fn acquire(&self) -> InFlightToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlightToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of live tokens.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until no tokens are live.
    ///
    /// Completes immediately if there are none.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a drop in between is not missed
            notified.as_mut().enable();

            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A token representing one in-flight connection.
#[derive(Debug)]
pub struct InFlightToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
