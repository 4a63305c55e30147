//! Error types for the reqscope context machinery.
//!
//! Stack discipline and missing-context errors are framework usage errors;
//! they carry distinct variants so callers can tell "no context was
//! established" apart from unrelated failures.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The kind of a context cell on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// An application context.
    App,
    /// A request context.
    Request,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => f.write_str("application"),
            Self::Request => f.write_str("request"),
        }
    }
}

/// The main error type for reqscope operations.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The context stack was used out of discipline.
    #[error("{0}")]
    Stack(#[from] StackError),

    /// An application-dependent lookup ran with no application context.
    #[error("Working outside of application context")]
    OutsideAppContext,

    /// A request-dependent lookup ran with no request context.
    #[error("Working outside of request context")]
    OutsideRequestContext,

    /// A body producer was wrapped while no request context was current.
    #[error("Attempted to stream with context outside of a request context")]
    WrappedOutsideRequestContext,

    /// A context that was already torn down was pushed again.
    #[error("Context {id} has already been torn down")]
    ContextClosed {
        /// Identifier of the closed context.
        id: String,
    },

    /// The current session cannot be written to.
    #[error("The session is unavailable because no secret key was set")]
    SessionUnavailable,

    /// One or more teardown callbacks failed.
    #[error("{0}")]
    Teardown(#[from] TeardownError),

    /// The route resolver could not build a URL.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// `url_for` was called with an inconsistent set of options.
    #[error("Invalid URL options: {0}")]
    InvalidUrlOptions(String),

    /// A requested file does not exist or lies outside its base directory.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A file response could not determine its content type.
    #[error("The mime type cannot be inferred, please set it manually via the mimetype argument")]
    IndeterminateMimetype,

    /// A header value could not be encoded.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// A handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScopeError {
    /// Returns true if this error means a required context was not active.
    #[must_use]
    pub fn is_outside_context(&self) -> bool {
        matches!(
            self,
            Self::OutsideAppContext
                | Self::OutsideRequestContext
                | Self::WrappedOutsideRequestContext
                | Self::Stack(StackError::Empty | StackError::NoSuchContext { .. })
        )
    }

    /// Creates a handler error from any displayable value.
    #[must_use]
    pub fn handler(message: impl fmt::Display) -> Self {
        Self::Handler(message.to_string())
    }
}

/// Errors raised by the strand-local context stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// The stack had no entries.
    #[error("Context stack is empty")]
    Empty,

    /// The stack has entries, but none of the requested kind.
    #[error("No {kind} context is on the stack")]
    NoSuchContext {
        /// The requested kind.
        kind: ContextKind,
    },

    /// The top entry was not pushed by the caller that is popping.
    #[error("Popped wrong context: expected push #{expected}, found push #{found}")]
    Mismatch {
        /// The push token the caller holds.
        expected: u64,
        /// The push token on top of the stack.
        found: u64,
    },

    /// A context was popped that this strand never pushed.
    #[error("This {kind} context is not pushed")]
    NotPushed {
        /// The kind of the context.
        kind: ContextKind,
    },
}

/// Error raised when teardown callbacks fail.
///
/// Every callback is attempted; the first failure is kept as the source.
#[derive(Debug, Error)]
#[error("Teardown callback '{name}' failed ({failed} of {attempted} failed): {source}")]
pub struct TeardownError {
    /// Name of the first callback that failed.
    pub name: String,
    /// The first failure.
    #[source]
    pub source: anyhow::Error,
    /// How many callbacks failed.
    pub failed: usize,
    /// How many callbacks ran.
    pub attempted: usize,
}

impl TeardownError {
    /// Creates a new teardown error from the first failure.
    #[must_use]
    pub fn new(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            name: name.into(),
            source,
            failed: 1,
            attempted: 1,
        }
    }

    /// Sets the failure and attempt counters.
    #[must_use]
    pub fn with_counts(mut self, failed: usize, attempted: usize) -> Self {
        self.failed = failed;
        self.attempted = attempted;
        self
    }

    /// Keeps the earlier of two teardown failures, adding up their counters.
    #[must_use]
    pub fn merge(self, later: Self) -> Self {
        let failed = self.failed + later.failed;
        let attempted = self.attempted + later.attempted;
        self.with_counts(failed, attempted)
    }
}

/// Error raised when a URL cannot be built for an endpoint.
#[derive(Debug, Clone, Error)]
#[error("Could not build url for endpoint '{endpoint}': {reason}")]
pub struct BuildError {
    /// The endpoint that was requested.
    pub endpoint: String,
    /// Why the build failed.
    pub reason: String,
    /// The values that were supplied.
    pub values: HashMap<String, String>,
}

impl BuildError {
    /// Creates a new build error.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reason: reason.into(),
            values: HashMap::new(),
        }
    }

    /// Records the supplied values.
    #[must_use]
    pub fn with_values<'a>(mut self, values: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.values = values
            .into_iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self
    }
}

/// Error raised when a file is missing or escapes its base directory.
///
/// Traversal attempts deliberately report the same condition as a missing
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Not found: {path}")]
pub struct NotFoundError {
    /// The path as requested by the caller.
    pub path: String,
}

impl NotFoundError {
    /// Creates a new not found error.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}
