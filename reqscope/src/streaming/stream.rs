//! The context-preserving stream wrapper.

use super::snapshot::{release_logged, CapturedContext, CloseHandle};
use crate::errors::ScopeError;
use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

pin_project! {
    /// A stream that is polled with its request context current.
    ///
    /// Created by [`stream_with_context`]. The captured contexts are
    /// released when the inner stream ends, yields an error, is closed, or
    /// the wrapper is dropped, whichever comes first. A teardown failure at
    /// exhaustion is yielded as one final `Err` item.
    pub struct ContextStream<S> {
        #[pin]
        inner: S,
        captured: Arc<CapturedContext>,
        finished: bool,
    }

    impl<S> PinnedDrop for ContextStream<S> {
        fn drop(this: Pin<&mut Self>) {
            release_logged(&this.captured);
        }
    }
}

/// Wraps `stream` so every poll sees the current request context.
///
/// Fails with [`ScopeError::WrappedOutsideRequestContext`] when no request
/// context is current.
pub fn stream_with_context<S, T, E>(stream: S) -> Result<ContextStream<S>, ScopeError>
where
    S: Stream<Item = Result<T, E>>,
    E: From<ScopeError>,
{
    let captured = CapturedContext::capture()?;
    Ok(ContextStream {
        inner: stream,
        captured,
        finished: false,
    })
}

impl<S> ContextStream<S> {
    /// Releases the captured contexts without draining the stream.
    ///
    /// Later polls yield `None`; repeated closes do nothing.
    pub fn close(&self) -> Result<(), ScopeError> {
        self.captured.release().map_err(ScopeError::from)
    }

    /// Returns a handle that can close this stream from any strand.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(self.captured.clone())
    }

    /// Returns true once the captured contexts were released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.captured.is_released()
    }

    /// Returns the captured snapshot.
    #[must_use]
    pub fn captured(&self) -> &Arc<CapturedContext> {
        &self.captured
    }
}

impl<S, T, E> Stream for ContextStream<S>
where
    S: Stream<Item = Result<T, E>>,
    E: From<ScopeError>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        let Ok(scope) = this.captured.enter() else {
            debug!("polled a closed context stream");
            *this.finished = true;
            return Poll::Ready(None);
        };
        let polled = this.inner.poll_next(cx);
        drop(scope);

        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(err))) => {
                *this.finished = true;
                if let Err(teardown) = this.captured.release() {
                    warn!(error = %teardown, "Teardown failed after a stream error");
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                match this.captured.release() {
                    Ok(()) => Poll::Ready(None),
                    Err(teardown) => Poll::Ready(Some(Err(ScopeError::from(teardown).into()))),
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            let (_, upper) = self.inner.size_hint();
            // One extra item may report a teardown failure.
            (0, upper.map(|n| n + 1))
        }
    }
}

impl<S> std::fmt::Debug for ContextStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStream")
            .field("captured", &self.captured)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::context::{current_request, has_request_context, spawn_strand, strand, ContextStack};
    use futures::{stream, StreamExt};
    use http::Method;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready};

    fn counting_app(counter: &Arc<AtomicUsize>) -> Arc<App> {
        let counter = counter.clone();
        App::new("stream")
            .teardown_request("count", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .into_shared()
    }

    fn paths() -> impl Stream<Item = Result<String, ScopeError>> {
        stream::iter(0..3).map(|i| current_request().map(|r| format!("{i}:{}", r.path())))
    }

    #[tokio::test]
    async fn test_wrap_outside_request_fails() {
        let err = stream_with_context(paths()).unwrap_err();
        assert!(matches!(err, ScopeError::WrappedOutsideRequestContext));
    }

    #[tokio::test]
    async fn test_drain_tears_down_once() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let app = counting_app(&torn_down);
        let ctx = app.test_request_context(Method::GET, "/feed");

        let wrapped = strand(ctx.run(async { stream_with_context(paths()) }))
            .await
            .unwrap()
            .unwrap();
        assert!(!has_request_context());
        assert_eq!(torn_down.load(Ordering::SeqCst), 0);

        let handle = wrapped.close_handle();
        let items: Vec<String> = wrapped.map(Result::unwrap).collect().await;
        assert_eq!(items, vec!["0:/feed", "1:/feed", "2:/feed"]);
        assert!(ContextStack::is_empty());
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);

        handle.close().unwrap();
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pulled_from_another_strand() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let app = counting_app(&torn_down);
        let ctx = app.test_request_context(Method::GET, "/remote");

        let wrapped = strand(ctx.run(async { stream_with_context(paths()) }))
            .await
            .unwrap()
            .unwrap();

        let items = spawn_strand(async move {
            let items: Vec<_> = wrapped.collect().await;
            (items, ContextStack::is_empty())
        })
        .await
        .unwrap();

        assert!(items.1);
        assert_eq!(items.0.len(), 3);
        assert_eq!(items.0[2].as_deref().unwrap(), "2:/remote");
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_without_drain() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let app = counting_app(&torn_down);
        let ctx = app.test_request_context(Method::GET, "/");

        let mut wrapped = strand(ctx.run(async { stream_with_context(paths()) }))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(wrapped.next().await.unwrap().unwrap(), "0:/");
        wrapped.close().unwrap();
        wrapped.close().unwrap();
        assert!(wrapped.is_closed());
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert!(wrapped.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let app = counting_app(&torn_down);
        let ctx = app.test_request_context(Method::GET, "/");

        let wrapped = strand(ctx.run(async { stream_with_context(paths()) }))
            .await
            .unwrap()
            .unwrap();
        drop(wrapped);

        assert!(ctx.is_torn_down());
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_item_releases_and_restores_stack() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let app = counting_app(&torn_down);
        let ctx = app.test_request_context(Method::GET, "/");

        let failing = stream::iter(vec![
            Ok("first".to_string()),
            Err(ScopeError::handler("producer failed")),
            Ok("never".to_string()),
        ]);
        let mut wrapped = strand(ctx.run(async { stream_with_context(failing) }))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(wrapped.next().await.unwrap().unwrap(), "first");
        let err = wrapped.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ScopeError::Handler(_)));
        assert!(ContextStack::is_empty());
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert!(wrapped.next().await.is_none());
    }

    #[tokio::test]
    async fn test_teardown_failure_is_final_item() {
        let app = App::new("stream")
            .teardown_request("explode", || Err(anyhow::anyhow!("cleanup failed")))
            .into_shared();
        let ctx = app.test_request_context(Method::GET, "/");

        let mut wrapped = strand(ctx.run(async { stream_with_context(paths()) }))
            .await
            .unwrap()
            .unwrap();

        let items: Vec<_> = (&mut wrapped).collect().await;
        assert_eq!(items.len(), 4);
        assert!(matches!(items[3], Err(ScopeError::Teardown(ref e)) if e.name == "explode"));
        assert!(wrapped.next().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_restores_stack() {
        let app = App::new("stream").into_shared();
        let ctx = app.test_request_context(Method::GET, "/slow");
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<String, ScopeError>>();

        let wrapped = strand(ctx.run(async { stream_with_context(rx) }))
            .await
            .unwrap()
            .unwrap();
        let mut task = tokio_test::task::spawn(wrapped);

        assert_pending!(task.poll_next());
        assert!(ContextStack::is_empty());

        tx.unbounded_send(Ok("late".to_string())).unwrap();
        assert!(task.is_woken());
        let item = assert_ready!(task.poll_next());
        assert_eq!(item.unwrap().unwrap(), "late");

        drop(tx);
        assert!(assert_ready!(task.poll_next()).is_none());
        assert!(ctx.is_torn_down());
    }
}
