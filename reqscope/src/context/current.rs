//! Lookups of whatever is current on this strand.

use super::{AppContext, ContextStack, Globals, RequestContext};
use crate::app::App;
use crate::errors::ScopeError;
use crate::session::Session;
use crate::wrappers::Request;
use std::sync::Arc;

/// Returns the current application context.
pub fn app_context() -> Result<Arc<AppContext>, ScopeError> {
    ContextStack::current_app().map_err(|_| ScopeError::OutsideAppContext)
}

/// Returns the current request context.
pub fn request_context() -> Result<Arc<RequestContext>, ScopeError> {
    ContextStack::current_request().map_err(|_| ScopeError::OutsideRequestContext)
}

/// Returns the application of the current application context.
pub fn current_app() -> Result<Arc<App>, ScopeError> {
    app_context().map(|ctx| ctx.app().clone())
}

/// Returns the request of the current request context.
pub fn current_request() -> Result<Arc<Request>, ScopeError> {
    request_context().map(|ctx| ctx.request().clone())
}

/// Returns the session of the current request context.
pub fn current_session() -> Result<Arc<Session>, ScopeError> {
    request_context().map(|ctx| ctx.session())
}

/// Returns the globals of the current application context.
pub fn g() -> Result<Arc<Globals>, ScopeError> {
    app_context().map(|ctx| ctx.g().clone())
}

/// Returns true if an application context is current.
#[must_use]
pub fn has_app_context() -> bool {
    ContextStack::current_app().is_ok()
}

/// Returns true if a request context is current.
#[must_use]
pub fn has_request_context() -> bool {
    ContextStack::current_request().is_ok()
}
