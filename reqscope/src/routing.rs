//! The seam between URL building and whatever router an application uses.

use http::Method;
use std::collections::BTreeMap;

pub use crate::errors::BuildError;

/// Builds paths for named endpoints.
///
/// The returned path is relative to the application root and starts with
/// `/`. Values not consumed by the route pattern become a query string.
pub trait RouteResolver: Send + Sync {
    /// Builds the path of `endpoint` from `values`.
    fn build(
        &self,
        endpoint: &str,
        values: &BTreeMap<String, String>,
        method: Option<&Method>,
    ) -> Result<String, BuildError>;

    /// Returns the host `endpoint` is bound to.
    ///
    /// Only consulted when the application matches routes by host. Routes
    /// without a host build URLs with an empty host.
    fn host(&self, _endpoint: &str) -> Option<String> {
        None
    }
}
