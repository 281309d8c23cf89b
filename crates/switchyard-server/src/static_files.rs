//! Static file fallback.
//!
//! Serves a directory behind the catch-all route, with:
//!
//! - Index file for directory paths (`index.html`)
//! - Cache headers (`Cache-Control`, `ETag`, `Last-Modified`) and `304`
//!   answers to conditional requests
//! - Single-page-app fallback: extension-less paths that match no file get
//!   the root index file
//! - MIME type detection
//!
//! # Security
//!
//! Paths containing `..` are rejected, hidden files (leading `.`) are not
//! served, and the resolved path must stay inside the root directory.
//!
//! # Example
//!
//! ```rust
//! use switchyard_server::StaticFiles;
//!
//! let files = StaticFiles::new("./public")
//!     .index("index.html")
//!     .cache_control("max-age=3600")
//!     .spa_fallback(true);
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use http::request::Parts;
use http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};
use thiserror::Error;

use switchyard_core::Status;

use crate::body::{self, HttpResponse};
use crate::fallback::{FallbackFuture, FallbackHandler};

/// Errors that can occur when serving static files.
#[derive(Debug, Error)]
pub enum StaticFileError {
    /// The requested file was not found.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The path is forbidden (traversal, hidden file, outside the root).
    #[error("forbidden path: {0}")]
    Forbidden(String),

    /// Only `GET` and `HEAD` are served.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// I/O error while reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StaticFileError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the error as a JSON response.
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        let status = match &self {
            Self::NotFound(_) => Status::not_found(self.to_string()),
            Self::Forbidden(_) => {
                Status::new(switchyard_core::Code::PermissionDenied, self.to_string())
            }
            Self::MethodNotAllowed => Status::unimplemented(self.to_string()),
            Self::Io(e) => {
                tracing::error!(error = %e, "Failed to read static file");
                Status::internal("failed to read file")
            }
        };
        let mut response = body::json_error(&status);
        *response.status_mut() = self.status_code();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

/// Static file server configuration and handler.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    /// Root directory for static files
    root: PathBuf,

    /// Index file name (e.g., "index.html")
    index_file: Option<String>,

    /// Default Cache-Control header value
    cache_control: Option<String>,

    /// Whether to include `ETag` headers
    etag_enabled: bool,

    /// Whether to include Last-Modified headers
    last_modified_enabled: bool,

    /// Whether unknown extension-less paths get the root index file
    spa_fallback: bool,
}

impl StaticFiles {
    /// Creates a static file server for `root` with `index.html` as the
    /// index file and validators enabled.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_file: Some("index.html".to_string()),
            cache_control: None,
            etag_enabled: true,
            last_modified_enabled: true,
            spa_fallback: false,
        }
    }

    /// Sets the index file name.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index_file = Some(name.into());
        self
    }

    /// Sets the `Cache-Control` header value.
    #[must_use]
    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    /// Enables or disables `ETag` headers.
    #[must_use]
    pub fn etag(mut self, enabled: bool) -> Self {
        self.etag_enabled = enabled;
        self
    }

    /// Enables or disables `Last-Modified` headers.
    #[must_use]
    pub fn last_modified(mut self, enabled: bool) -> Self {
        self.last_modified_enabled = enabled;
        self
    }

    /// Enables single-page-app fallback to the root index file.
    #[must_use]
    pub fn spa_fallback(mut self, enabled: bool) -> Self {
        self.spa_fallback = enabled;
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serves `request_path`.
    ///
    /// Blocking: reads the file synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the method is not GET or HEAD, the path is
    /// forbidden, the file does not exist, or reading fails.
    pub fn handle(
        &self,
        request_path: &str,
        headers: &HeaderMap,
        method: &Method,
    ) -> Result<HttpResponse, StaticFileError> {
        if method != Method::GET && method != Method::HEAD {
            return Err(StaticFileError::MethodNotAllowed);
        }

        match self.resolve_file(request_path) {
            Err(StaticFileError::NotFound(_)) if self.spa_fallback && !has_extension(request_path) => {
                let index = self.resolve_file("/")?;
                self.serve_file(&index, headers, method)
            }
            resolved => self.serve_file(&resolved?, headers, method),
        }
    }

    /// Resolves a request path to a file, applying the index file for
    /// directories.
    fn resolve_file(&self, request_path: &str) -> Result<PathBuf, StaticFileError> {
        let path = self.resolve_path(request_path)?;
        if path.is_dir() {
            if let Some(ref index) = self.index_file {
                let index_path = path.join(index);
                if index_path.is_file() {
                    return Ok(index_path);
                }
            }
            return Err(StaticFileError::NotFound(request_path.to_string()));
        }
        Ok(path)
    }

    /// Resolves a request path to a canonical path inside the root.
    fn resolve_path(&self, request_path: &str) -> Result<PathBuf, StaticFileError> {
        let path = request_path.trim_start_matches('/');

        for component in Path::new(path).components() {
            match component {
                Component::ParentDir => {
                    return Err(StaticFileError::Forbidden(
                        "directory traversal not allowed".to_string(),
                    ));
                }
                Component::Normal(name) => {
                    if name.to_str().is_some_and(|name| name.starts_with('.')) {
                        return Err(StaticFileError::Forbidden(
                            "hidden files not allowed".to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }

        let canonical = self
            .root
            .join(path)
            .canonicalize()
            .map_err(|_| StaticFileError::NotFound(request_path.to_string()))?;
        let canonical_root = self.root.canonicalize()?;
        if !canonical.starts_with(&canonical_root) {
            return Err(StaticFileError::Forbidden(
                "path escapes root directory".to_string(),
            ));
        }

        Ok(canonical)
    }

    fn serve_file(
        &self,
        path: &Path,
        headers: &HeaderMap,
        method: &Method,
    ) -> Result<HttpResponse, StaticFileError> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata.modified().ok();

        let etag = if self.etag_enabled {
            modified.and_then(|m| generate_etag(m, metadata.len()))
        } else {
            None
        };

        // If-None-Match takes precedence over If-Modified-Since
        let if_none_match = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok());
        if let Some(value) = if_none_match {
            if let Some(ref etag) = etag {
                if value.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*") {
                    return Ok(self.not_modified_response(Some(etag)));
                }
            }
        } else if self.last_modified_enabled {
            let since = headers
                .get(header::IF_MODIFIED_SINCE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| httpdate::parse_http_date(v).ok());
            if let (Some(modified), Some(since)) = (modified, since) {
                if unix_secs(modified) <= unix_secs(since) {
                    return Ok(self.not_modified_response(etag.as_deref()));
                }
            }
        }

        let content = if method == Method::HEAD {
            Bytes::new()
        } else {
            Bytes::from(std::fs::read(path)?)
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, detect_mime_type(path))
            .header(header::CONTENT_LENGTH, metadata.len());

        if let Some(ref cache_control) = self.cache_control {
            builder = builder.header(header::CACHE_CONTROL, cache_control.as_str());
        }
        if let Some(ref etag) = etag {
            builder = builder.header(header::ETAG, etag.as_str());
        }
        if self.last_modified_enabled {
            if let Some(modified) = modified {
                builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
            }
        }

        builder
            .body(body::full(content))
            .map_err(|e| StaticFileError::Io(std::io::Error::other(e.to_string())))
    }

    fn not_modified_response(&self, etag: Option<&str>) -> HttpResponse {
        let mut response = Response::new(body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        let headers = response.headers_mut();
        if let Some(value) = etag.and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::ETAG, value);
        }
        if let Some(value) = self
            .cache_control
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header::CACHE_CONTROL, value);
        }
        response
    }
}

impl FallbackHandler for StaticFiles {
    fn call(&self, request: &Parts) -> FallbackFuture {
        let files = self.clone();
        let path = request.uri.path().to_string();
        let headers = request.headers.clone();
        let method = request.method.clone();

        Box::pin(async move {
            let served =
                tokio::task::spawn_blocking(move || files.handle(&path, &headers, &method)).await;
            match served {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => e.into_response(),
                Err(e) => {
                    tracing::error!(error = %e, "Static file task failed");
                    body::json_error(&Status::internal("failed to read file"))
                }
            }
        })
    }
}

fn has_extension(request_path: &str) -> bool {
    request_path
        .rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.'))
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Weak validator from modification time and size.
fn generate_etag(modified: SystemTime, size: u64) -> Option<String> {
    let since_epoch = modified.duration_since(SystemTime::UNIX_EPOCH).ok()?;
    Some(format!(
        "\"{:x}-{:x}-{:x}\"",
        since_epoch.as_secs(),
        since_epoch.subsec_nanos(),
        size
    ))
}

fn detect_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "webmanifest" => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use http_body_util::BodyExt;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("index.html"), "<html>Hello</html>").unwrap();
        fs::write(dir.path().join("style.css"), "body { color: red }").unwrap();
        fs::write(dir.path().join("app.wasm"), [0x00, 0x61, 0x73, 0x6d]).unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1").unwrap();

        let subdir = dir.path().join("docs");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("index.html"), "<html>Docs</html>").unwrap();

        dir
    }

    fn get(files: &StaticFiles, path: &str) -> Result<HttpResponse, StaticFileError> {
        files.handle(path, &HeaderMap::new(), &Method::GET)
    }

    async fn text(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serve_file_with_mime_type() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        let response = get(&files, "/style.css").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css; charset=utf-8"
        );
        assert_eq!(text(response).await, "body { color: red }");

        let response = get(&files, "/app.wasm").unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/wasm"
        );
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        assert_eq!(text(get(&files, "/").unwrap()).await, "<html>Hello</html>");
        assert_eq!(text(get(&files, "/docs/").unwrap()).await, "<html>Docs</html>");
    }

    #[test]
    fn test_traversal_and_hidden_files_blocked() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        assert!(matches!(
            get(&files, "/../etc/passwd"),
            Err(StaticFileError::Forbidden(_))
        ));
        assert!(matches!(get(&files, "/.env"), Err(StaticFileError::Forbidden(_))));
    }

    #[test]
    fn test_not_found_and_method() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        assert!(matches!(
            get(&files, "/missing.css"),
            Err(StaticFileError::NotFound(_))
        ));
        assert!(matches!(
            files.handle("/index.html", &HeaderMap::new(), &Method::POST),
            Err(StaticFileError::MethodNotAllowed)
        ));
    }

    #[tokio::test]
    async fn test_spa_fallback() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path()).spa_fallback(true);

        let response = get(&files, "/settings/profile").unwrap();
        assert_eq!(text(response).await, "<html>Hello</html>");

        // assets keep their 404
        assert!(matches!(
            get(&files, "/missing.js"),
            Err(StaticFileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_head_has_length_but_no_body() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        let response = files
            .handle("/index.html", &HeaderMap::new(), &Method::HEAD)
            .unwrap();
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "18");
        assert!(text(response).await.is_empty());
    }

    #[test]
    fn test_validators_and_cache_control() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path()).cache_control("max-age=60");

        let response = get(&files, "/index.html").unwrap();
        assert!(response.headers().contains_key(header::ETAG));
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "max-age=60");

        let files = files.etag(false).last_modified(false);
        let response = get(&files, "/index.html").unwrap();
        assert!(!response.headers().contains_key(header::ETAG));
        assert!(!response.headers().contains_key(header::LAST_MODIFIED));
    }

    #[test]
    fn test_if_none_match_returns_304() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        let first = get(&files, "/index.html").unwrap();
        let etag = first.headers().get(header::ETAG).unwrap().clone();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag);
        let second = files.handle("/index.html", &headers, &Method::GET).unwrap();
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn test_if_modified_since_returns_304() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path()).etag(false);

        let first = get(&files, "/index.html").unwrap();
        let last_modified = first.headers().get(header::LAST_MODIFIED).unwrap().clone();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, last_modified);
        let second = files.handle("/index.html", &headers, &Method::GET).unwrap();
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_fallback_handler_renders_errors() {
        let dir = create_test_dir();
        let files = StaticFiles::new(dir.path());

        let (parts, ()) = Request::get("/missing.css").body(()).unwrap().into_parts();
        let response = files.call(&parts).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let (parts, ()) = Request::delete("/index.html").body(()).unwrap().into_parts();
        let response = files.call(&parts).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, HEAD");

        let (parts, ()) = Request::get("/style.css").body(()).unwrap().into_parts();
        assert_eq!(files.call(&parts).await.status(), StatusCode::OK);
    }
}
