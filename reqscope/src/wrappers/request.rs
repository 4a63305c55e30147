//! Minimal request model consumed by the contexts.

use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::Method;

/// The parts of an incoming request the context machinery reads.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query_string: String,
    root_path: String,
    scheme: String,
    host: Option<String>,
    headers: HeaderMap,
}

impl Request {
    /// Creates a request; a `?query` suffix of `path` becomes the query
    /// string.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query_string) = path.split_once('?').unwrap_or((path, ""));
        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query_string: query_string.to_string(),
            root_path: String::new(),
            scheme: "http".to_string(),
            host: None,
            headers: HeaderMap::new(),
        }
    }

    /// Sets the root path the application is mounted under.
    #[must_use]
    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    /// Sets the scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Sets the host, overriding any `Host` header.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path, without root path or query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string.
    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Returns the root path.
    #[must_use]
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Returns the scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host, falling back to the `Host` header.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host
            .as_deref()
            .or_else(|| self.headers.get(HOST).and_then(|v| v.to_str().ok()))
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the full path including root path and query string.
    #[must_use]
    pub fn full_path(&self) -> String {
        let root = self.root_path.trim_end_matches('/');
        if self.query_string.is_empty() {
            format!("{root}{}", self.path)
        } else {
            format!("{root}{}?{}", self.path, self.query_string)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_query() {
        let request = Request::new(Method::GET, "/search?q=rust&page=2");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query_string(), "q=rust&page=2");
        assert_eq!(request.scheme(), "http");
    }

    #[test]
    fn test_empty_path_is_root() {
        assert_eq!(Request::new(Method::GET, "").path(), "/");
    }

    #[test]
    fn test_host_prefers_explicit_over_header() {
        let request = Request::new(Method::GET, "/")
            .with_header(HOST, HeaderValue::from_static("header.example"));
        assert_eq!(request.host(), Some("header.example"));

        let request = request.with_host("explicit.example");
        assert_eq!(request.host(), Some("explicit.example"));
    }

    #[test]
    fn test_full_path() {
        let request = Request::new(Method::GET, "/items?id=1").with_root_path("/app/");
        assert_eq!(request.full_path(), "/app/items?id=1");
    }
}
