//! Process lifecycle: bind, serve, drain.
//!
//! ```text
//! Init -> Bound -> Serving -> Draining -> Stopped
//!   \        \
//!    +--------+--> Failed
//! ```
//!
//! [`Supervisor::bind`] moves `Init -> Bound` (or `Failed`);
//! [`BoundServer::serve`] runs `Serving` until the shutdown signal fires,
//! then drains. Draining stops accepting, asks every connection to finish
//! gracefully, and waits for them or for the shutdown timeout, whichever
//! comes first. When the timeout wins, every request token is cancelled,
//! remaining connection tasks are aborted, and the report says so.
//!
//! The current phase is published on a `watch` channel.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::error::{ServeError, ShutdownTimeout, StartupError};
use crate::gateway::Gateway;
use crate::shutdown::{InFlightTracker, ShutdownSignal};

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Constructed, not yet bound.
    Init,
    /// Listener bound, not yet accepting.
    Bound,
    /// Accepting connections.
    Serving,
    /// Shutdown signalled; waiting for in-flight connections.
    Draining,
    /// Fully stopped.
    Stopped,
    /// Startup or serving failed.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Bound => "bound",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How draining ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection finished before the deadline.
    Clean,
    /// The deadline elapsed and connections were aborted.
    Forced {
        /// Connections still open at the deadline.
        remaining: usize,
    },
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// How draining ended.
    pub outcome: DrainOutcome,
    /// Timeouts recorded while draining.
    pub timeouts: Vec<ShutdownTimeout>,
}

impl ShutdownReport {
    /// Returns `true` if draining finished before the deadline.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcome == DrainOutcome::Clean
    }
}

/// Owns the gateway until it is bound.
pub struct Supervisor {
    gateway: Arc<Gateway>,
    config: ServerConfig,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    /// Creates a supervisor in phase [`Phase::Init`].
    #[must_use]
    pub fn new(gateway: Gateway, config: ServerConfig) -> Self {
        let (phase, _) = watch::channel(Phase::Init);
        Self {
            gateway: Arc::new(gateway),
            config,
            phase,
        }
    }

    /// Subscribes to phase changes.
    #[must_use]
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// [`StartupError::InvalidAddress`] or [`StartupError::Bind`]; the phase
    /// moves to [`Phase::Failed`].
    pub async fn bind(self) -> Result<BoundServer, StartupError> {
        match self.try_bind().await {
            Ok(listener) => {
                let local_addr = listener.local_addr().map_err(|source| {
                    self.phase.send_replace(Phase::Failed);
                    StartupError::Bind {
                        addr: self.config.http_addr().to_string(),
                        source,
                    }
                })?;
                self.phase.send_replace(Phase::Bound);
                tracing::info!(addr = %local_addr, "Listener bound");
                Ok(BoundServer {
                    listener,
                    local_addr,
                    gateway: self.gateway,
                    config: self.config,
                    phase: self.phase,
                })
            }
            Err(e) => {
                self.phase.send_replace(Phase::Failed);
                tracing::error!(error = %e, "Failed to bind");
                Err(e)
            }
        }
    }

    async fn try_bind(&self) -> Result<TcpListener, StartupError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| StartupError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                reason: e.to_string(),
            })?;
        TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: addr.to_string(),
                source,
            })
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

/// A supervisor whose listener is bound.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    gateway: Arc<Gateway>,
    config: ServerConfig,
    phase: watch::Sender<Phase>,
}

impl BoundServer {
    /// Returns the bound address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribes to phase changes.
    #[must_use]
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Serves until `shutdown` fires, then drains.
    ///
    /// # Errors
    ///
    /// [`ServeError::Accept`] if the listener fails with a non-transient
    /// error; the phase moves to [`Phase::Failed`].
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<ShutdownReport, ServeError> {
        let Self {
            listener,
            local_addr,
            gateway,
            config,
            phase,
        } = self;

        let mut builder = auto::Builder::new(TokioExecutor::new());
        if !config.http2_enabled() {
            builder = builder.http1_only();
        }
        let builder = Arc::new(builder);
        let tracker = InFlightTracker::new();
        let mut connections = JoinSet::new();
        let mut backoff: Option<Duration> = None;

        phase.send_replace(Phase::Serving);
        tracing::info!(addr = %local_addr, "Server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        backoff = None;
                        let token = tracker.acquire();
                        let connection = serve_connection(
                            Arc::clone(&builder),
                            stream,
                            remote_addr,
                            Arc::clone(&gateway),
                            shutdown.clone(),
                        );
                        connections.spawn(async move {
                            connection.await;
                            drop(token);
                        });
                    }
                    Err(e) if is_resource_exhaustion(&e) => {
                        let delay = backoff
                            .map_or(MIN_ACCEPT_BACKOFF, |d| (d * 2).min(MAX_ACCEPT_BACKOFF));
                        backoff = Some(delay);
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis(),
                            "Accept failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                    Err(e) => {
                        phase.send_replace(Phase::Failed);
                        tracing::error!(error = %e, "Listener failed");
                        connections.abort_all();
                        return Err(ServeError::Accept(e));
                    }
                },
                () = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping server");
                    break;
                }
            }

            // reap finished connections
            while connections.try_join_next().is_some() {}
        }

        drop(listener);
        phase.send_replace(Phase::Draining);

        let shutdown_timeout = config.shutdown_timeout();
        tracing::info!(
            timeout = ?shutdown_timeout,
            connections = tracker.in_flight(),
            "Draining connections"
        );

        let outcome = tokio::select! {
            () = tracker.wait_idle() => DrainOutcome::Clean,
            () = tokio::time::sleep(shutdown_timeout) => {
                let remaining = tracker.in_flight();
                gateway.shutdown_token().cancel();
                connections.abort_all();
                DrainOutcome::Forced { remaining }
            }
        };
        while connections.join_next().await.is_some() {}

        let timeouts = match outcome {
            DrainOutcome::Clean => {
                tracing::info!("All connections closed");
                Vec::new()
            }
            DrainOutcome::Forced { remaining } => {
                let timeout = ShutdownTimeout {
                    timeout: shutdown_timeout,
                    remaining,
                };
                tracing::warn!(error = %timeout, "Forced shutdown");
                vec![timeout]
            }
        };

        phase.send_replace(Phase::Stopped);
        tracing::info!("Server stopped");
        Ok(ShutdownReport { outcome, timeouts })
    }
}

impl fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundServer")
            .field("local_addr", &self.local_addr)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Serves one connection until it closes or shutdown asks it to finish.
async fn serve_connection(
    builder: Arc<auto::Builder<TokioExecutor>>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown: ShutdownSignal,
) {
    let service = service_fn(move |request: Request<Incoming>| {
        let gateway = Arc::clone(&gateway);
        async move { Ok::<_, Infallible>(gateway.handle(request).await) }
    });

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.recv() => {
            tracing::debug!(remote = %remote_addr, "Closing connection for shutdown");
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        tracing::debug!(remote = %remote_addr, error = %e, "Connection error");
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || is_resource_exhaustion(e)
}

/// Out of descriptors or buffers. The listener is still usable once
/// connections close, so accepting resumes after a delay.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ServiceRegistry;

    fn supervisor(addr: &str) -> Supervisor {
        let config = ServerConfig::builder()
            .http_addr(addr)
            .shutdown_timeout(Duration::from_millis(200))
            .build();
        let gateway = Gateway::builder(ServiceRegistry::new())
            .config(config.clone())
            .build()
            .unwrap();
        Supervisor::new(gateway, config)
    }

    #[tokio::test]
    async fn test_invalid_address_fails() {
        let supervisor = supervisor("not-an-address");
        let phase = supervisor.phase();

        let err = supervisor.bind().await.unwrap_err();
        assert!(matches!(err, StartupError::InvalidAddress { .. }));
        assert_eq!(*phase.borrow(), Phase::Failed);
    }

    #[tokio::test]
    async fn test_address_in_use_fails() {
        let first = supervisor("127.0.0.1:0").bind().await.unwrap();
        let taken = first.local_addr().to_string();

        let err = supervisor(&taken).bind().await.unwrap_err();
        assert!(matches!(err, StartupError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_phases_and_clean_shutdown() {
        let supervisor = supervisor("127.0.0.1:0");
        let mut phase = supervisor.phase();
        assert_eq!(*phase.borrow(), Phase::Init);

        let bound = supervisor.bind().await.unwrap();
        assert_eq!(*phase.borrow_and_update(), Phase::Bound);
        assert_ne!(bound.local_addr().port(), 0);

        let shutdown = ShutdownSignal::new();
        let server = tokio::spawn(bound.serve(shutdown.clone()));

        phase.wait_for(|p| *p == Phase::Serving).await.unwrap();
        shutdown.trigger();

        let report = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(report.is_clean());
        assert!(report.timeouts.is_empty());
        assert_eq!(*phase.borrow(), Phase::Stopped);
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_resource_exhaustion(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_is_transient() {
        for errno in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS, libc::ENOMEM] {
            let e = io::Error::from_raw_os_error(errno);
            assert!(is_resource_exhaustion(&e), "{e}");
            assert!(is_transient(&e), "{e}");
        }
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Draining.to_string(), "draining");
        assert_eq!(Phase::Failed.to_string(), "failed");
    }
}
