//! Application context cells.

use super::lifetime::Lifetime;
use super::stack::{isolated, ContextCell, ContextStack, PushToken};
use super::{Globals, PopGuard};
use crate::app::App;
use crate::errors::{ContextKind, ScopeError, StackError, TeardownError};
use crate::teardown::TeardownRegistry;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One application's activation on a strand.
///
/// Kept alive by pushes, by request contexts pushed on top of it, and by
/// captured snapshots. Teardown runs once, when the last of those lets go.
pub struct AppContext {
    id: Uuid,
    app: Arc<App>,
    globals: Arc<Globals>,
    lifetime: Lifetime,
    pushes: Mutex<Vec<PushToken>>,
}

impl AppContext {
    pub(crate) fn new(app: Arc<App>) -> Self {
        let registry = TeardownRegistry::with_callbacks(app.appcontext_teardown_hooks().iter().cloned());
        Self {
            id: Uuid::new_v4(),
            app,
            globals: Arc::new(Globals::new()),
            lifetime: Lifetime::new(registry),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Returns the context ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the owning application.
    #[must_use]
    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Returns the per-context globals.
    #[must_use]
    pub fn g(&self) -> &Arc<Globals> {
        &self.globals
    }

    /// Registers a callback to run when this context is torn down.
    pub fn call_on_close<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lifetime.registry().register(name, callback);
    }

    /// Returns true once teardown has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.lifetime.is_torn_down()
    }

    /// Returns how many pushes, dependents and snapshots hold this context.
    #[must_use]
    pub fn hold_count(&self) -> usize {
        self.lifetime.holds()
    }

    /// Pushes this context onto the current strand's stack.
    pub fn push(self: &Arc<Self>) -> Result<PushToken, ScopeError> {
        if !self.lifetime.retain() {
            return Err(ScopeError::ContextClosed {
                id: self.id.to_string(),
            });
        }
        let token = ContextStack::push(ContextCell::App(self.clone()));
        self.pushes.lock().push(token);
        debug!(app_ctx = %self.id, app = %self.app.name(), "pushed application context");
        Ok(token)
    }

    /// Pops this context off the current strand's stack.
    ///
    /// Fails without side effects if this context is not on top. Runs the
    /// teardown callbacks if nothing else holds the context.
    pub fn pop(self: &Arc<Self>) -> Result<(), ScopeError> {
        let token = self
            .pushes
            .lock()
            .pop()
            .ok_or(StackError::NotPushed { kind: ContextKind::App })?;

        if let Err(err) = ContextStack::pop_expected(token) {
            self.pushes.lock().push(token);
            return Err(err.into());
        }
        debug!(app_ctx = %self.id, "popped application context");

        self.release().map_err(ScopeError::from)
    }

    /// Runs a future with this context pushed.
    ///
    /// The context is popped when the future completes or is dropped.
    /// Outside a strand the future runs on a private copy of the thread
    /// stack, so other tasks on the same worker never observe the push.
    pub async fn run<F: Future>(self: &Arc<Self>, future: F) -> Result<F::Output, ScopeError> {
        isolated(self.run_pushed(future)).await
    }

    async fn run_pushed<F: Future>(self: &Arc<Self>, future: F) -> Result<F::Output, ScopeError> {
        self.push()?;
        let guard = PopGuard::new(ContextCell::App(self.clone()));
        let output = future.await;
        guard.finish()?;
        Ok(output)
    }

    /// Takes a hold on behalf of a dependent request context or snapshot.
    pub(crate) fn retain(&self) -> bool {
        self.lifetime.retain()
    }

    /// Drops a hold, tearing down if it was the last.
    pub(crate) fn release(&self) -> Result<(), TeardownError> {
        let (_, result) = self.lifetime.release(|registry| {
            debug!(app_ctx = %self.id, "tearing down application context");
            registry.run_all()
        });
        result
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("id", &self.id)
            .field("app", &self.app.name())
            .field("holds", &self.lifetime.holds())
            .field("torn_down", &self.lifetime.is_torn_down())
            .finish()
    }
}
