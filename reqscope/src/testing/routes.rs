//! An in-memory route resolver.

use crate::routing::{BuildError, RouteResolver};
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// `<name>` or `<converter:name>`.
const PLACEHOLDER: &str = r"<(?:[a-zA-Z_][a-zA-Z0-9_]*:)?([a-zA-Z_][a-zA-Z0-9_]*)>";

/// Characters left as-is in a path segment or query component.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

#[derive(Debug, Clone)]
struct Route {
    pattern: String,
    methods: Option<Vec<Method>>,
    host: Option<String>,
}

/// Endpoints mapped to path patterns such as `/resource/<int:id>`.
///
/// Values not used by a pattern are appended as a sorted query string.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteMap {
    routes: HashMap<String, Route>,
}

impl StaticRouteMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint accepting any method.
    #[must_use]
    pub fn route(mut self, endpoint: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.routes.insert(
            endpoint.into(),
            Route {
                pattern: pattern.into(),
                methods: None,
                host: None,
            },
        );
        self
    }

    /// Adds an endpoint bound to `host`, accepting any method.
    #[must_use]
    pub fn route_on_host(
        mut self,
        endpoint: impl Into<String>,
        host: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        self.routes.insert(
            endpoint.into(),
            Route {
                pattern: pattern.into(),
                methods: None,
                host: Some(host.into()),
            },
        );
        self
    }

    /// Adds an endpoint accepting only `methods`.
    #[must_use]
    pub fn route_with_methods(
        mut self,
        endpoint: impl Into<String>,
        pattern: impl Into<String>,
        methods: &[Method],
    ) -> Self {
        self.routes.insert(
            endpoint.into(),
            Route {
                pattern: pattern.into(),
                methods: Some(methods.to_vec()),
                host: None,
            },
        );
        self
    }

    /// Returns the number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no endpoint is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteResolver for StaticRouteMap {
    fn build(
        &self,
        endpoint: &str,
        values: &BTreeMap<String, String>,
        method: Option<&Method>,
    ) -> Result<String, BuildError> {
        let fail = |reason: String| BuildError::new(endpoint, reason).with_values(values);

        let route = self
            .routes
            .get(endpoint)
            .ok_or_else(|| fail("no such endpoint".to_string()))?;
        if let (Some(method), Some(methods)) = (method, &route.methods) {
            if !methods.contains(method) {
                return Err(fail(format!("method {method} is not allowed")));
            }
        }

        let placeholder = Regex::new(PLACEHOLDER).map_err(|err| fail(err.to_string()))?;
        let mut used = BTreeSet::new();
        let mut missing = None;
        let path = placeholder.replace_all(&route.pattern, |caps: &Captures<'_>| {
            let name = &caps[1];
            if let Some(value) = values.get(name) {
                used.insert(name.to_string());
                utf8_percent_encode(value, COMPONENT).to_string()
            } else {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        });
        if let Some(name) = missing {
            return Err(fail(format!("missing value for '{name}'")));
        }

        let query: Vec<String> = values
            .iter()
            .filter(|(name, _)| !used.contains(*name))
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(name, COMPONENT),
                    utf8_percent_encode(value, COMPONENT)
                )
            })
            .collect();

        if query.is_empty() {
            Ok(path.into_owned())
        } else {
            Ok(format!("{path}?{}", query.join("&")))
        }
    }

    fn host(&self, endpoint: &str) -> Option<String> {
        self.routes.get(endpoint).and_then(|route| route.host.clone())
    }
}
