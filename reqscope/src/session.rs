//! Session objects and the interface that opens and saves them.
//!
//! Serialization of sessions is left to [`SessionInterface`]
//! implementations; this module only models the mapping and its flags.

use crate::app::App;
use crate::errors::ScopeError;
use crate::wrappers::Request;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A JSON-valued session mapping with a `modified` flag.
///
/// A null session stands in when no real session could be opened. It reads
/// as empty and rejects every write with [`ScopeError::SessionUnavailable`].
#[derive(Debug)]
pub struct Session {
    data: RwLock<HashMap<String, serde_json::Value>>,
    modified: AtomicBool,
    accessed: AtomicBool,
    writable: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an empty writable session.
    #[must_use]
    pub fn new() -> Self {
        Self::from_data(HashMap::new())
    }

    /// Creates a writable session holding `data`.
    #[must_use]
    pub fn from_data(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            data: RwLock::new(data),
            modified: AtomicBool::new(false),
            accessed: AtomicBool::new(false),
            writable: true,
        }
    }

    /// Creates a read-only null session.
    #[must_use]
    pub fn null() -> Self {
        Self {
            writable: false,
            ..Self::new()
        }
    }

    /// Returns true for a null session.
    #[must_use]
    pub fn is_null(&self) -> bool {
        !self.writable
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.accessed.store(true, Ordering::SeqCst);
        self.data.read().get(key).cloned()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.accessed.store(true, Ordering::SeqCst);
        self.data.read().contains_key(key)
    }

    /// Sets a value and marks the session modified.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Result<(), ScopeError> {
        self.ensure_writable()?;
        self.data.write().insert(key.into(), value);
        self.mark_modified();
        Ok(())
    }

    /// Removes a value and marks the session modified.
    pub fn remove(&self, key: &str) -> Result<Option<serde_json::Value>, ScopeError> {
        self.ensure_writable()?;
        let removed = self.data.write().remove(key);
        self.mark_modified();
        Ok(removed)
    }

    /// Returns true if the session was written to.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    /// Flags the session for persistence.
    pub fn mark_modified(&self) {
        self.accessed.store(true, Ordering::SeqCst);
        self.modified.store(true, Ordering::SeqCst);
    }

    /// Returns true if the session was read or written.
    #[must_use]
    pub fn is_accessed(&self) -> bool {
        self.accessed.load(Ordering::SeqCst)
    }

    /// Returns a copy of all values.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the session holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn ensure_writable(&self) -> Result<(), ScopeError> {
        if self.writable {
            Ok(())
        } else {
            Err(ScopeError::SessionUnavailable)
        }
    }
}

/// Opens and persists sessions for an application.
#[cfg_attr(test, mockall::automock)]
pub trait SessionInterface: Send + Sync {
    /// Opens the session for a request. `None` yields a null session.
    fn open_session(&self, app: &App, request: &Request) -> Option<Session>;

    /// Persists a session when its request context is torn down.
    fn save_session(&self, app: &App, session: &Session) -> anyhow::Result<()>;
}

/// Keeps sessions only for the lifetime of their request.
///
/// Opens an empty writable session when the application has a secret key
/// and a null session otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralSessionInterface;

impl SessionInterface for EphemeralSessionInterface {
    fn open_session(&self, app: &App, _request: &Request) -> Option<Session> {
        app.config().secret_key.as_ref().map(|_| Session::new())
    }

    fn save_session(&self, app: &App, session: &Session) -> anyhow::Result<()> {
        if session.is_modified() {
            debug!(app = %app.name(), entries = session.len(), "discarding modified ephemeral session");
        }
        Ok(())
    }
}
