//! # Reqscope
//!
//! Request-scoped context for async web handlers.
//!
//! Reqscope keeps track of which application and which request are
//! "current" for the code running on a strand of execution, with support
//! for:
//!
//! - **Context stack**: strand-local push/pop of application and request
//!   contexts, with implicit application contexts and teardown-once
//!   lifetimes
//! - **Context-preserving streams**: bodies produced after the handler
//!   returned still see their request, on whichever strand pulls them
//! - **Flash messages**: one-shot messages carried in the session
//! - **Helpers**: `url_for`, `safe_join`, `send_file` and friends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reqscope::prelude::*;
//!
//! let app = App::new("demo").into_shared();
//! let handler = || async {
//!     let body = stream_with_context(futures::stream::iter(["a", "b"]).map(|chunk| {
//!         let request = current_request()?;
//!         Ok::<_, ScopeError>(Bytes::from(format!("{chunk} {}", request.path())))
//!     }))?;
//!     Ok(Response::new(Body::from_stream(body)))
//! };
//! let response = app.dispatch(Request::new(Method::GET, "/"), &handler).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod app;
pub mod context;
pub mod errors;
pub mod flash;
pub mod helpers;
pub mod logging;
pub mod routing;
pub mod session;
pub mod streaming;
pub mod teardown;
pub mod testing;
pub mod wrappers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::app::{App, AppConfig, Handler};
    pub use crate::context::{
        app_context, current_app, current_request, current_session, g, has_app_context,
        has_request_context, request_context, spawn_strand, strand, AppContext, ContextStack,
        RequestContext,
    };
    pub use crate::errors::{BuildError, NotFoundError, ScopeError, StackError, TeardownError};
    pub use crate::helpers::{
        flash, get_flashed_messages, get_flashed_messages_with_categories, make_response,
        safe_join, send_file, send_from_directory, stream_with_context, url_for,
        with_captured_context, SendFileOptions, UrlOptions,
    };
    pub use crate::routing::RouteResolver;
    pub use crate::session::{Session, SessionInterface};
    pub use crate::streaming::{CloseHandle, ContextStream};
    pub use crate::wrappers::{Body, Request, Response};
    pub use bytes::Bytes;
    pub use futures::StreamExt;
    pub use http::{Method, StatusCode};
}
