//! Recording collaborators for tests.

use crate::app::App;
use crate::session::{Session, SessionInterface};
use crate::wrappers::Request;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type SessionData = HashMap<String, serde_json::Value>;

/// A session interface that keeps the last saved session in memory.
///
/// Every request opens a writable session seeded with whatever was saved
/// last, so values such as flashes carry from one request to the next.
#[derive(Debug, Default)]
pub struct RecordingSessionInterface {
    saved: Mutex<Vec<SessionData>>,
    opened: AtomicUsize,
}

impl RecordingSessionInterface {
    /// Creates an interface with no saved sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every saved session, oldest first.
    #[must_use]
    pub fn saved(&self) -> Vec<SessionData> {
        self.saved.lock().clone()
    }

    /// Returns the most recently saved session.
    #[must_use]
    pub fn last_saved(&self) -> Option<SessionData> {
        self.saved.lock().last().cloned()
    }

    /// Returns how many sessions were saved.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saved.lock().len()
    }

    /// Returns how many sessions were opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SessionInterface for RecordingSessionInterface {
    fn open_session(&self, _app: &App, _request: &Request) -> Option<Session> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Some(Session::from_data(self.last_saved().unwrap_or_default()))
    }

    fn save_session(&self, _app: &App, session: &Session) -> anyhow::Result<()> {
        if session.is_modified() {
            self.saved.lock().push(session.to_dict());
        }
        Ok(())
    }
}

/// Counts teardown callback runs.
#[derive(Debug, Clone, Default)]
pub struct TeardownProbe {
    runs: Arc<AtomicUsize>,
}

impl TeardownProbe {
    /// Creates a probe that has not run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a callback that bumps this probe.
    pub fn callback(&self) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let runs = self.runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Returns a callback that bumps this probe and then fails.
    pub fn failing_callback(
        &self,
        message: &'static str,
    ) -> impl Fn() -> anyhow::Result<()> + Send + Sync + 'static {
        let runs = self.runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!(message))
        }
    }

    /// Returns how many times a callback ran.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}
