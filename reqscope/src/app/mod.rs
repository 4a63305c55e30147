//! The application object contexts are created for.

mod config;

pub use config::{AppConfig, DEFAULT_SEND_FILE_MAX_AGE};

use crate::context::{strand, AppContext, RequestContext};
use crate::errors::ScopeError;
use crate::routing::RouteResolver;
use crate::session::{EphemeralSessionInterface, SessionInterface};
use crate::teardown::TeardownCallback;
use crate::wrappers::{Request, Response};
use async_trait::async_trait;
use http::Method;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A request handler run by [`App::dispatch`].
///
/// Implemented for every `Fn() -> impl Future<Output = Result<Response, _>>`.
/// Handlers reach the request through [`crate::context::current_request`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles the current request.
    async fn call(&self) -> Result<Response, ScopeError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, ScopeError>> + Send,
{
    async fn call(&self) -> Result<Response, ScopeError> {
        (self)().await
    }
}

/// An application: configuration plus the collaborators its contexts use.
pub struct App {
    name: String,
    config: AppConfig,
    session_interface: Arc<dyn SessionInterface>,
    route_resolver: Option<Arc<dyn RouteResolver>>,
    request_teardown: Vec<TeardownCallback>,
    appcontext_teardown: Vec<TeardownCallback>,
}

impl App {
    /// Creates an application with default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: AppConfig::default(),
            session_interface: Arc::new(EphemeralSessionInterface),
            route_resolver: None,
            request_teardown: Vec::new(),
            appcontext_teardown: Vec::new(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the session interface.
    #[must_use]
    pub fn with_session_interface(mut self, interface: Arc<dyn SessionInterface>) -> Self {
        self.session_interface = interface;
        self
    }

    /// Sets the route resolver used by [`crate::helpers::url_for`].
    #[must_use]
    pub fn with_route_resolver(mut self, resolver: Arc<dyn RouteResolver>) -> Self {
        self.route_resolver = Some(resolver);
        self
    }

    /// Registers a callback run when each request context is torn down.
    #[must_use]
    pub fn teardown_request<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.request_teardown.push(TeardownCallback::new(name, callback));
        self
    }

    /// Registers a callback run when each application context is torn down.
    #[must_use]
    pub fn teardown_appcontext<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.appcontext_teardown.push(TeardownCallback::new(name, callback));
        self
    }

    /// Wraps the application for sharing between contexts.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Returns the application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the session interface.
    #[must_use]
    pub fn session_interface(&self) -> &Arc<dyn SessionInterface> {
        &self.session_interface
    }

    /// Returns the route resolver, if one is configured.
    #[must_use]
    pub fn route_resolver(&self) -> Option<&Arc<dyn RouteResolver>> {
        self.route_resolver.as_ref()
    }

    /// Returns the cache max-age given to file responses without an
    /// explicit timeout.
    #[must_use]
    pub fn send_file_max_age(&self) -> Duration {
        self.config.send_file_max_age_default
    }

    pub(crate) fn request_teardown_hooks(&self) -> &[TeardownCallback] {
        &self.request_teardown
    }

    pub(crate) fn appcontext_teardown_hooks(&self) -> &[TeardownCallback] {
        &self.appcontext_teardown
    }

    /// Creates a new, unpushed application context.
    #[must_use]
    pub fn app_context(self: &Arc<Self>) -> Arc<AppContext> {
        Arc::new(AppContext::new(self.clone()))
    }

    /// Creates a new, unpushed request context for `request`.
    #[must_use]
    pub fn request_context(self: &Arc<Self>, request: Request) -> Arc<RequestContext> {
        Arc::new(RequestContext::new(self.clone(), request))
    }

    /// Creates a request context for a synthetic request, as a test client
    /// would send it.
    #[must_use]
    pub fn test_request_context(self: &Arc<Self>, method: Method, path: &str) -> Arc<RequestContext> {
        let host = self
            .config
            .server_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string());
        let request = Request::new(method, path)
            .with_host(host)
            .with_scheme(self.config.preferred_url_scheme.clone());
        self.request_context(request)
    }

    /// Handles `request` with `handler` on a strand of its own.
    ///
    /// The request context is pushed and its session opened before the
    /// handler runs, and popped as soon as it returns. A streamed body
    /// wrapped with [`crate::streaming::stream_with_context`] keeps the
    /// context alive until the body is drained or closed.
    pub async fn dispatch<H>(self: &Arc<Self>, request: Request, handler: &H) -> Result<Response, ScopeError>
    where
        H: Handler + ?Sized,
    {
        let ctx = self.request_context(request);
        strand(async {
            ctx.run(async {
                ctx.session();
                handler.call().await
            })
            .await?
        })
        .await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_route_resolver", &self.route_resolver.is_some())
            .finish_non_exhaustive()
    }
}
