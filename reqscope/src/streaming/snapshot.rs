//! Captured contexts and re-entry scopes.

use crate::context::{AppContext, ContextCell, ContextStack, RequestContext};
use crate::errors::{ScopeError, TeardownError};
use crate::teardown::first_failure;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// The request context current at capture time, and its application
/// context, held open until released.
pub struct CapturedContext {
    app_ctx: Arc<AppContext>,
    request_ctx: Arc<RequestContext>,
    released: AtomicBool,
}

impl CapturedContext {
    /// Captures the current request context.
    ///
    /// Fails with [`ScopeError::WrappedOutsideRequestContext`] when no
    /// request context is current.
    pub fn capture() -> Result<Arc<Self>, ScopeError> {
        let request_ctx =
            ContextStack::current_request().map_err(|_| ScopeError::WrappedOutsideRequestContext)?;
        let app_ctx = match request_ctx.app_context() {
            Some(ctx) => ctx,
            None => ContextStack::current_app().map_err(|_| ScopeError::OutsideAppContext)?,
        };

        if !request_ctx.retain() {
            return Err(ScopeError::ContextClosed {
                id: request_ctx.id().to_string(),
            });
        }
        if !app_ctx.retain() {
            if let Err(err) = request_ctx.release() {
                warn!(error = %err, "Teardown failed while abandoning a capture");
            }
            return Err(ScopeError::ContextClosed {
                id: app_ctx.id().to_string(),
            });
        }

        debug!(request_ctx = %request_ctx.id(), app_ctx = %app_ctx.id(), "captured context");
        Ok(Arc::new(Self {
            app_ctx,
            request_ctx,
            released: AtomicBool::new(false),
        }))
    }

    /// Returns the captured application context.
    #[must_use]
    pub fn app_context(&self) -> &Arc<AppContext> {
        &self.app_ctx
    }

    /// Returns the captured request context.
    #[must_use]
    pub fn request_context(&self) -> &Arc<RequestContext> {
        &self.request_ctx
    }

    /// Returns true once the capture let go of its contexts.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Makes the captured contexts current on this strand until the returned
    /// scope is dropped.
    pub fn enter(&self) -> Result<EnteredScope, ScopeError> {
        if self.is_released() {
            return Err(ScopeError::ContextClosed {
                id: self.request_ctx.id().to_string(),
            });
        }
        let depth = ContextStack::depth();
        ContextStack::push(ContextCell::App(self.app_ctx.clone()));
        ContextStack::push(ContextCell::Request(self.request_ctx.clone()));
        Ok(EnteredScope { depth })
    }

    /// Lets go of the captured contexts. Only the first call has an effect.
    ///
    /// The request context is released before its application context, so
    /// request teardown still sees the application alive.
    pub fn release(&self) -> Result<(), TeardownError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(request_ctx = %self.request_ctx.id(), "releasing captured context");
        first_failure([self.request_ctx.release(), self.app_ctx.release()])
    }
}

impl std::fmt::Debug for CapturedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedContext")
            .field("app_ctx", &self.app_ctx.id())
            .field("request_ctx", &self.request_ctx.id())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Restores the stack depth recorded by [`CapturedContext::enter`].
#[derive(Debug)]
#[must_use = "the captured contexts leave the stack when the scope is dropped"]
pub struct EnteredScope {
    depth: usize,
}

impl Drop for EnteredScope {
    fn drop(&mut self) {
        let removed = ContextStack::truncate(self.depth);
        if removed != 2 {
            warn!(removed, depth = self.depth, "Unbalanced stack after a captured resumption");
        }
    }
}

/// Closes a captured context from anywhere, without polling its owner.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    captured: Arc<CapturedContext>,
}

impl CloseHandle {
    pub(crate) fn new(captured: Arc<CapturedContext>) -> Self {
        Self { captured }
    }

    /// Releases the captured contexts; later calls do nothing.
    pub fn close(&self) -> Result<(), ScopeError> {
        self.captured.release().map_err(ScopeError::from)
    }

    /// Returns true once closed, drained or dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.captured.is_released()
    }
}

pin_project! {
    /// A future polled with a captured context current.
    ///
    /// The capture is released when the future completes or is dropped;
    /// teardown failures at that point are logged.
    pub struct ContextFuture<F> {
        #[pin]
        inner: F,
        captured: Arc<CapturedContext>,
    }

    impl<F> PinnedDrop for ContextFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            release_logged(&this.captured);
        }
    }
}

impl<F> ContextFuture<F> {
    /// Returns a handle that can release the capture early.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(self.captured.clone())
    }
}

impl<F: Future> Future for ContextFuture<F> {
    type Output = Result<F::Output, ScopeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let scope = this.captured.enter()?;
        let polled = this.inner.poll(cx);
        drop(scope);

        if polled.is_ready() {
            release_logged(this.captured);
        }
        polled.map(Ok)
    }
}

/// Wraps `future` so it runs with the current request context, wherever it
/// is polled.
///
/// Fails with [`ScopeError::WrappedOutsideRequestContext`] when no request
/// context is current.
pub fn with_captured_context<F: Future>(future: F) -> Result<ContextFuture<F>, ScopeError> {
    Ok(ContextFuture {
        inner: future,
        captured: CapturedContext::capture()?,
    })
}

pub(super) fn release_logged(captured: &CapturedContext) {
    if let Err(err) = captured.release() {
        warn!(error = %err, "Teardown failed while closing a captured context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::context::{current_request, has_request_context, spawn_strand, strand};
    use http::Method;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_capture_outside_request_fails() {
        let err = CapturedContext::capture().unwrap_err();
        assert!(matches!(err, ScopeError::WrappedOutsideRequestContext));
    }

    #[tokio::test]
    async fn test_capture_defers_teardown_until_release() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = torn_down.clone();
        let app = App::new("capture")
            .teardown_request("count", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .into_shared();
        let ctx = app.test_request_context(Method::GET, "/");

        let captured = strand(ctx.run(async { CapturedContext::capture() }))
            .await
            .unwrap()
            .unwrap();
        assert!(!ctx.is_torn_down());
        assert_eq!(torn_down.load(Ordering::SeqCst), 0);

        captured.release().unwrap();
        captured.release().unwrap();
        assert!(ctx.is_torn_down());
        assert!(captured.app_context().is_torn_down());
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert!(captured.enter().is_err());
    }

    #[tokio::test]
    async fn test_enter_restores_depth() {
        let app = App::new("capture").into_shared();
        let ctx = app.test_request_context(Method::GET, "/enter");
        let captured = strand(ctx.run(async { CapturedContext::capture() }))
            .await
            .unwrap()
            .unwrap();

        strand(async {
            assert!(!has_request_context());
            {
                let _scope = captured.enter().unwrap();
                assert_eq!(ContextStack::depth(), 2);
                assert_eq!(current_request().unwrap().path(), "/enter");
            }
            assert!(ContextStack::is_empty());
        })
        .await;
        captured.release().unwrap();
    }

    #[tokio::test]
    async fn test_future_runs_on_another_strand() {
        let app = App::new("capture").into_shared();
        let ctx = app.test_request_context(Method::PUT, "/copy");

        let future = strand(ctx.run(async {
            with_captured_context(async { current_request().map(|r| r.path().to_string()) })
        }))
        .await
        .unwrap()
        .unwrap();
        let handle = future.close_handle();

        let path = spawn_strand(future).await.unwrap().unwrap().unwrap();
        assert_eq!(path, "/copy");
        assert!(handle.is_closed());
        assert!(ctx.is_torn_down());
    }

    #[tokio::test]
    async fn test_close_handle_releases_dropped_future_once() {
        let app = App::new("capture").into_shared();
        let ctx = app.test_request_context(Method::GET, "/");
        let future = strand(ctx.run(async { with_captured_context(async {}) }))
            .await
            .unwrap()
            .unwrap();

        let handle = future.close_handle();
        handle.close().unwrap();
        assert!(ctx.is_torn_down());
        drop(future);
        assert!(handle.is_closed());
        assert_eq!(ctx.hold_count(), 0);
    }
}
