//! A ready-made application for tests.

use super::StaticRouteMap;
use crate::app::{App, AppConfig};
use http::Method;
use std::sync::Arc;

/// Server name of [`test_app`].
pub const TEST_SERVER_NAME: &str = "localhost";

/// Secret key of [`test_app`].
pub const TEST_SECRET_KEY: &str = "secret";

/// Builds an application with a server name, a secret key, and three
/// routes: `index` at `/`, `index_post` at `/post` (POST only), and
/// `resource` at `/resource/<int:id>`.
#[must_use]
pub fn test_app() -> App {
    let routes = StaticRouteMap::new()
        .route("index", "/")
        .route_with_methods("index_post", "/post", &[Method::POST])
        .route("resource", "/resource/<int:id>");

    App::new("test")
        .with_config(
            AppConfig::new()
                .with_server_name(TEST_SERVER_NAME)
                .with_secret_key(TEST_SECRET_KEY),
        )
        .with_route_resolver(Arc::new(routes))
}
