//! Prefix routing between protocol surfaces.
//!
//! The router maps URL path prefixes to one of the gateway's surfaces. It is
//! built once through [`RouterBuilder`] and is immutable afterwards.
//!
//! Matching rules:
//!
//! 1. A prefix matches a path on segment boundaries: `/api/v1` matches
//!    `/api/v1` and `/api/v1/Greeter/Ping` but not `/api/v10`.
//! 2. The longest matching prefix wins.
//! 3. Equal prefixes are resolved by registration order (first wins).
//! 4. A path no prefix matches goes to [`RouteTarget::Fallback`].
//!
//! # Example
//!
//! ```rust
//! use switchyard_server::{Router, RouteTarget};
//!
//! let router = Router::builder()
//!     .route("/api/v1", RouteTarget::Transcoder)
//!     .route("/pkg.Greeter", RouteTarget::BinaryRpc)
//!     .build();
//!
//! assert_eq!(router.resolve("/api/v1/Greeter/Ping"), RouteTarget::Transcoder);
//! assert_eq!(router.resolve("/pkg.Greeter/Ping"), RouteTarget::BinaryRpc);
//! assert_eq!(router.resolve("/index.html"), RouteTarget::Fallback);
//! ```

use std::fmt;

use crate::config::normalize_prefix;

/// The surface a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// Native binary RPC (gRPC framing).
    BinaryRpc,
    /// Schema reflection.
    Reflection,
    /// HTTP+JSON bridge.
    Transcoder,
    /// Catch-all (static content or 404).
    Fallback,
}

impl RouteTarget {
    /// Returns the short name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BinaryRpc => "binary_rpc",
            Self::Reflection => "reflection",
            Self::Transcoder => "transcoder",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    prefix: String,
    target: RouteTarget,
    order: usize,
}

impl RouteEntry {
    /// Returns the normalized prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the target surface.
    #[must_use]
    pub const fn target(&self) -> RouteTarget {
        self.target
    }

    /// Returns the registration order.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Builder for [`Router`].
#[derive(Debug, Clone, Default)]
pub struct RouterBuilder {
    entries: Vec<RouteEntry>,
}

impl RouterBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. The prefix is normalized (`api/v1/` becomes `/api/v1`).
    #[must_use]
    pub fn route(mut self, prefix: impl AsRef<str>, target: RouteTarget) -> Self {
        let order = self.entries.len();
        self.entries.push(RouteEntry {
            prefix: normalize_prefix(prefix.as_ref()),
            target,
            order,
        });
        self
    }

    /// Freezes the routing table.
    #[must_use]
    pub fn build(self) -> Router {
        let mut entries = self.entries;
        // longest prefix first, registration order among equals
        entries.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then(a.order.cmp(&b.order))
        });
        Router { entries }
    }
}

/// Immutable routing table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    /// Sorted by descending prefix length, then registration order
    entries: Vec<RouteEntry>,
}

impl Router {
    /// Creates a new router builder.
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Returns the entry matching `path`, if any.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|entry| entry.matches(path))
    }

    /// Returns the surface for `path`, falling back to [`RouteTarget::Fallback`].
    #[must_use]
    pub fn resolve(&self, path: &str) -> RouteTarget {
        self.match_path(path)
            .map_or(RouteTarget::Fallback, RouteEntry::target)
    }

    /// Returns the entries in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<&RouteEntry> {
        let mut entries: Vec<&RouteEntry> = self.entries.iter().collect();
        entries.sort_by_key(|entry| entry.order);
        entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gateway_router() -> Router {
        Router::builder()
            .route("/api.v1.APIService", RouteTarget::BinaryRpc)
            .route("/grpc.reflection.v1.ServerReflection", RouteTarget::Reflection)
            .route("/api/v1", RouteTarget::Transcoder)
            .route("/", RouteTarget::Fallback)
            .build()
    }

    #[test]
    fn test_resolve_surfaces() {
        let router = gateway_router();
        assert_eq!(router.resolve("/api.v1.APIService/Ping"), RouteTarget::BinaryRpc);
        assert_eq!(
            router.resolve("/grpc.reflection.v1.ServerReflection/ServerReflectionInfo"),
            RouteTarget::Reflection
        );
        assert_eq!(router.resolve("/api/v1/APIService/Ping"), RouteTarget::Transcoder);
        assert_eq!(router.resolve("/"), RouteTarget::Fallback);
        assert_eq!(router.resolve("/assets/app.js"), RouteTarget::Fallback);
    }

    #[test]
    fn test_segment_boundaries() {
        let router = Router::builder().route("/api/v1", RouteTarget::Transcoder).build();
        assert_eq!(router.resolve("/api/v1"), RouteTarget::Transcoder);
        assert_eq!(router.resolve("/api/v1/"), RouteTarget::Transcoder);
        assert_eq!(router.resolve("/api/v10/x"), RouteTarget::Fallback);
        assert_eq!(router.resolve("/api"), RouteTarget::Fallback);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::builder()
            .route("/api", RouteTarget::Fallback)
            .route("/api/v1", RouteTarget::Transcoder)
            .build();
        assert_eq!(router.resolve("/api/v1/Greeter/Ping"), RouteTarget::Transcoder);
        assert_eq!(router.resolve("/api/v2/Greeter/Ping"), RouteTarget::Fallback);
    }

    #[test]
    fn test_ties_broken_by_registration_order() {
        let router = Router::builder()
            .route("/rpc", RouteTarget::BinaryRpc)
            .route("/rpc/", RouteTarget::Transcoder)
            .build();
        let entry = router.match_path("/rpc/x").unwrap();
        assert_eq!(entry.target(), RouteTarget::BinaryRpc);
        assert_eq!(entry.order(), 0);
    }

    #[test]
    fn test_entries_in_registration_order() {
        let router = gateway_router();
        let prefixes: Vec<_> = router.entries().iter().map(|e| e.prefix()).collect();
        assert_eq!(
            prefixes,
            vec![
                "/api.v1.APIService",
                "/grpc.reflection.v1.ServerReflection",
                "/api/v1",
                "/",
            ]
        );
        assert_eq!(router.len(), 4);
    }

    #[test]
    fn test_empty_router_falls_back() {
        let router = Router::builder().build();
        assert!(router.is_empty());
        assert_eq!(router.resolve("/anything"), RouteTarget::Fallback);
    }

    fn target_strategy() -> impl Strategy<Value = RouteTarget> {
        prop_oneof![
            Just(RouteTarget::BinaryRpc),
            Just(RouteTarget::Reflection),
            Just(RouteTarget::Transcoder),
            Just(RouteTarget::Fallback),
        ]
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "api", "v1"]), 0..4)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }

    proptest! {
        #[test]
        fn prop_routing_is_deterministic(
            routes in prop::collection::vec((path_strategy(), target_strategy()), 0..8),
            paths in prop::collection::vec(path_strategy(), 1..16),
        ) {
            let build = || routes
                .iter()
                .fold(Router::builder(), |b, (prefix, target)| b.route(prefix, *target))
                .build();
            let first = build();
            let second = build();

            for path in &paths {
                prop_assert_eq!(first.match_path(path), second.match_path(path));
                prop_assert_eq!(first.resolve(path), first.resolve(path));
            }
        }

        #[test]
        fn prop_match_is_longest_then_earliest(
            routes in prop::collection::vec((path_strategy(), target_strategy()), 1..8),
            path in path_strategy(),
        ) {
            let router = routes
                .iter()
                .fold(Router::builder(), |b, (prefix, target)| b.route(prefix, *target))
                .build();

            let expected = router
                .entries()
                .into_iter()
                .filter(|entry| entry.matches(&path))
                .min_by(|a, b| b.prefix.len().cmp(&a.prefix.len()).then(a.order.cmp(&b.order)));

            prop_assert_eq!(router.match_path(&path), expected);
        }
    }
}
