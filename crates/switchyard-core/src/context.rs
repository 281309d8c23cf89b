//! Request context types.
//!
//! The [`RequestContext`] carries per-call state into handlers. It is the
//! same for every protocol surface: a handler cannot tell whether it was
//! reached through the binary protocol or the JSON bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A unique identifier for each call, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log correlation cheap.
///
/// # Example
///
/// ```
/// use switchyard_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-call context handed to every handler.
///
/// Carries:
/// - a unique request ID for log correlation
/// - the resolved service and method names
/// - an optional deadline
/// - a cancellation token, a child of the server-wide drain token
///
/// The token is cancelled when the server starts draining or when the call
/// itself is abandoned (client disconnect, forced abort). Long-running
/// handlers should watch [`RequestContext::cancelled`].
///
/// # Example
///
/// ```
/// use switchyard_core::RequestContext;
///
/// let ctx = RequestContext::new("api.v1.APIService", "Ping");
/// assert_eq!(ctx.method(), "Ping");
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    service: String,
    method: String,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for a call to `service`/`method` with a fresh ID,
    /// no deadline, and a detached cancellation token.
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            service: service.into(),
            method: method.into(),
            deadline: None,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Creates a context for tests.
    #[must_use]
    pub fn mock() -> Self {
        Self::new("test.v1.TestService", "Test")
    }

    /// Returns a context whose deadline is `timeout` from now.
    ///
    /// An earlier existing deadline wins. A timeout too large to represent
    /// as an instant sets no deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let Some(candidate) = Instant::now().checked_add(timeout) else {
            return self;
        };
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Returns a context whose token is a child of `parent`.
    #[must_use]
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the fully qualified service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the deadline, if one was set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, if one was set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the call's cancellation token.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Returns the time elapsed since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
