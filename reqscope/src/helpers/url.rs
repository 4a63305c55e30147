//! URL building for named endpoints.

use crate::app::App;
use crate::context::{app_context, request_context};
use crate::errors::{BuildError, ScopeError};
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Characters left as-is in an anchor.
const ANCHOR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Options for [`url_for`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOptions {
    /// Route variables; unused ones become the query string.
    pub values: BTreeMap<String, String>,
    /// Method the route must accept.
    pub method: Option<Method>,
    /// Build an absolute URL. Defaults to false inside a request and true
    /// outside one.
    pub external: Option<bool>,
    /// Scheme of an external URL.
    pub scheme: Option<String>,
    /// Fragment appended after `#`, percent-encoded.
    pub anchor: Option<String>,
}

impl UrlOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route variable.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets whether the URL is absolute.
    #[must_use]
    pub fn external(mut self, external: bool) -> Self {
        self.external = Some(external);
        self
    }

    /// Sets the scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Sets the anchor.
    #[must_use]
    pub fn anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }
}

struct Target {
    app: Arc<App>,
    endpoint: String,
    external: bool,
    host: Option<String>,
    scheme: String,
    root: String,
}

/// Builds the URL of `endpoint`.
///
/// Inside a request the request's host, scheme and root path are used and
/// `.name` resolves against the blueprint of the matched endpoint. With only
/// an application context the configured server name, preferred scheme and
/// application root are used instead.
///
/// With host matching enabled the host comes from the route instead, and a
/// route bound to a host other than the current one always builds an
/// absolute URL.
pub fn url_for(endpoint: &str, options: UrlOptions) -> Result<String, ScopeError> {
    let target = match request_context() {
        Ok(ctx) => {
            let request = ctx.request();
            Target {
                app: ctx.app().clone(),
                endpoint: relative_endpoint(endpoint, ctx.blueprint().as_deref()),
                external: options.external.unwrap_or(false),
                host: request
                    .host()
                    .map(str::to_string)
                    .or_else(|| ctx.app().config().server_name.clone()),
                scheme: request.scheme().to_string(),
                root: request.root_path().to_string(),
            }
        }
        Err(_) => {
            let ctx = app_context()?;
            let config = ctx.app().config();
            let host = config.server_name.clone().ok_or_else(|| {
                ScopeError::InvalidUrlOptions(
                    "Unable to create a url adapter, try setting the SERVER_NAME config variable."
                        .to_string(),
                )
            })?;
            Target {
                app: ctx.app().clone(),
                endpoint: relative_endpoint(endpoint, None),
                external: options.external.unwrap_or(true),
                host: Some(host),
                scheme: config.preferred_url_scheme.clone(),
                root: config.application_root.clone(),
            }
        }
    };

    if options.scheme.is_some() && !target.external {
        return Err(ScopeError::InvalidUrlOptions(
            "External must be True for scheme usage".to_string(),
        ));
    }

    let resolver = target.app.route_resolver().ok_or_else(|| {
        BuildError::new(&target.endpoint, "no route resolver is configured").with_values(&options.values)
    })?;
    let path = resolver.build(&target.endpoint, &options.values, options.method.as_ref())?;

    let (external, host) = if target.app.config().host_matching {
        let route_host = resolver.host(&target.endpoint).unwrap_or_default();
        let foreign = target.host.as_deref() != Some(route_host.as_str());
        (target.external || foreign, Some(route_host))
    } else {
        (target.external, target.host)
    };

    let mut url = format!("{}{path}", target.root.trim_end_matches('/'));
    if external {
        let scheme = options.scheme.as_deref().unwrap_or(&target.scheme);
        let host = host.as_deref().unwrap_or_default();
        url = format!("{scheme}://{host}{url}");
    }
    if let Some(anchor) = &options.anchor {
        url.push('#');
        url.extend(utf8_percent_encode(anchor, ANCHOR));
    }
    Ok(url)
}

fn relative_endpoint(endpoint: &str, blueprint: Option<&str>) -> String {
    match (endpoint.strip_prefix('.'), blueprint) {
        (Some(name), Some(blueprint)) => format!("{blueprint}.{name}"),
        (Some(name), None) => name.to_string(),
        (None, _) => endpoint.to_string(),
    }
}
