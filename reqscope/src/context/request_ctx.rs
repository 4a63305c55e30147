//! Request context cells.

use super::lifetime::Lifetime;
use super::stack::{isolated, ContextCell, ContextStack, PushToken};
use super::{AppContext, PopGuard};
use crate::app::App;
use crate::errors::{ContextKind, ScopeError, StackError, TeardownError};
use crate::session::Session;
use crate::teardown::{first_failure, TeardownRegistry};
use crate::wrappers::Request;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Flashed messages as `(category, message)` pairs.
pub(crate) type FlashList = Vec<(String, String)>;

struct PushFrame {
    token: PushToken,
    app_ctx: Arc<AppContext>,
    implicit: bool,
}

/// One in-flight request on a strand.
///
/// Pushing a request context makes sure an application context for the
/// same application is current, creating and pushing one when needed. That
/// implicit context is popped again by the matching [`RequestContext::pop`].
pub struct RequestContext {
    id: Uuid,
    app: Arc<App>,
    request: Arc<Request>,
    session: Mutex<Option<Arc<Session>>>,
    endpoint: RwLock<Option<String>>,
    flashes: Mutex<Option<FlashList>>,
    app_ctx: RwLock<Option<Arc<AppContext>>>,
    pushes: Mutex<Vec<PushFrame>>,
    lifetime: Lifetime,
}

impl RequestContext {
    pub(crate) fn new(app: Arc<App>, request: Request) -> Self {
        let registry = TeardownRegistry::with_callbacks(app.request_teardown_hooks().iter().cloned());
        Self {
            id: Uuid::new_v4(),
            app,
            request: Arc::new(request),
            session: Mutex::new(None),
            endpoint: RwLock::new(None),
            flashes: Mutex::new(None),
            app_ctx: RwLock::new(None),
            pushes: Mutex::new(Vec::new()),
            lifetime: Lifetime::new(registry),
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

    /// Returns the wrapped request.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Returns the session, opening it through the session interface on
    /// first access.
    pub fn session(&self) -> Arc<Session> {
        let mut slot = self.session.lock();
        if let Some(session) = slot.as_ref() {
            return session.clone();
        }
        let session = Arc::new(
            self.app
                .session_interface()
                .open_session(&self.app, &self.request)
                .unwrap_or_else(Session::null),
        );
        debug!(request_ctx = %self.id, null = session.is_null(), "opened session");
        *slot = Some(session.clone());
        session
    }

    /// Returns the matched endpoint, once routing resolved one.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint.read().clone()
    }

    /// Records the matched endpoint.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        *self.endpoint.write() = Some(endpoint.into());
    }

    /// Returns the blueprint of the matched endpoint (`"bp.index"` → `"bp"`).
    #[must_use]
    pub fn blueprint(&self) -> Option<String> {
        self.endpoint
            .read()
            .as_deref()
            .and_then(|endpoint| endpoint.rsplit_once('.'))
            .map(|(blueprint, _)| blueprint.to_string())
    }

    /// Returns the application context this request was last pushed under.
    #[must_use]
    pub fn app_context(&self) -> Option<Arc<AppContext>> {
        self.app_ctx.read().clone()
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

    /// Returns how many pushes and snapshots hold this context.
    #[must_use]
    pub fn hold_count(&self) -> usize {
        self.lifetime.holds()
    }

    /// Pushes this context onto the current strand's stack.
    pub fn push(self: &Arc<Self>) -> Result<PushToken, ScopeError> {
        if self.lifetime.is_torn_down() {
            return Err(self.closed());
        }

        let existing = ContextStack::current_app()
            .ok()
            .filter(|ctx| Arc::ptr_eq(ctx.app(), &self.app) && ctx.retain());

        let (app_ctx, implicit) = match existing {
            Some(ctx) => (ctx, false),
            None => {
                let ctx = self.app.app_context();
                ctx.push()?;
                ctx.retain();
                (ctx, true)
            }
        };

        if !self.lifetime.retain() {
            self.abandon_app_context(&app_ctx, implicit);
            return Err(self.closed());
        }

        *self.app_ctx.write() = Some(app_ctx.clone());
        let token = ContextStack::push(ContextCell::Request(self.clone()));
        self.pushes.lock().push(PushFrame {
            token,
            app_ctx,
            implicit,
        });
        debug!(
            request_ctx = %self.id,
            method = %self.request.method(),
            path = %self.request.path(),
            implicit_app = implicit,
            "pushed request context"
        );
        Ok(token)
    }

    /// Pops this context off the current strand's stack.
    ///
    /// Also pops the application context pushed implicitly by the matching
    /// push. Teardown runs for every context nothing else holds any more.
    pub fn pop(self: &Arc<Self>) -> Result<(), ScopeError> {
        let frame = self.pushes.lock().pop().ok_or(StackError::NotPushed {
            kind: ContextKind::Request,
        })?;

        if let Err(err) = ContextStack::pop_expected(frame.token) {
            self.pushes.lock().push(frame);
            return Err(err.into());
        }
        debug!(request_ctx = %self.id, "popped request context");

        let teardown = first_failure([self.release(), frame.app_ctx.release()]);
        let implicit = if frame.implicit {
            frame.app_ctx.pop()
        } else {
            Ok(())
        };

        match (teardown, implicit) {
            (Err(first), Err(ScopeError::Teardown(later))) => Err(first.merge(later).into()),
            (Err(first), _) => Err(first.into()),
            (Ok(()), implicit) => implicit,
        }
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
        let guard = PopGuard::new(ContextCell::Request(self.clone()));
        let output = future.await;
        guard.finish()?;
        Ok(output)
    }

    /// Gives back the application hold taken by a push that was rejected.
    fn abandon_app_context(&self, app_ctx: &Arc<AppContext>, implicit: bool) {
        if let Err(err) = app_ctx.release() {
            warn!(request_ctx = %self.id, error = %err, "Application teardown failed after a rejected push");
        }
        if implicit {
            if let Err(err) = app_ctx.pop() {
                warn!(request_ctx = %self.id, error = %err, "Failed to pop implicit application context");
            }
        }
    }

    /// Returns the cached flashes, loading them with `load` on first use.
    pub(crate) fn cached_flashes<F>(&self, load: F) -> Result<FlashList, ScopeError>
    where
        F: FnOnce(&Session) -> Result<FlashList, ScopeError>,
    {
        let mut cache = self.flashes.lock();
        if let Some(flashes) = cache.as_ref() {
            return Ok(flashes.clone());
        }
        let flashes = load(&self.session())?;
        *cache = Some(flashes.clone());
        Ok(flashes)
    }

    /// Takes a hold on behalf of a captured snapshot.
    pub(crate) fn retain(&self) -> bool {
        self.lifetime.retain()
    }

    /// Drops a hold; the last one saves the session and runs teardown.
    pub(crate) fn release(&self) -> Result<(), TeardownError> {
        let (_, result) = self.lifetime.release(|registry| {
            debug!(request_ctx = %self.id, "tearing down request context");
            let saved = self.save_session();
            first_failure([saved, registry.run_all()])
        });
        result
    }

    fn save_session(&self) -> Result<(), TeardownError> {
        let session = self.session.lock().clone();
        match session {
            Some(session) if !session.is_null() => self
                .app
                .session_interface()
                .save_session(&self.app, &session)
                .map_err(|err| TeardownError::new("save_session", err)),
            _ => Ok(()),
        }
    }

    fn closed(&self) -> ScopeError {
        ScopeError::ContextClosed {
            id: self.id.to_string(),
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", self.request.method())
            .field("path", &self.request.path())
            .field("holds", &self.lifetime.holds())
            .field("torn_down", &self.lifetime.is_torn_down())
            .finish()
    }
}
