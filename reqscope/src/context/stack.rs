//! Strand-local context stack.
//!
//! Every tokio task entered through [`strand`] or [`spawn_strand`] owns an
//! isolated stack. Synchronous code outside any strand scope uses a stack
//! local to the current thread, created on first use. The async `run`
//! methods of both context kinds never touch that thread stack: outside a
//! strand they scope their future to a private copy of it, so a suspended
//! task cannot leave contexts behind for other tasks on the same worker.
//! Stacks are never shared implicitly; see
//! [`crate::streaming::CapturedContext`] for explicit sharing.

use super::{AppContext, RequestContext};
use crate::errors::{ContextKind, StackError};
use futures::future::Either;
use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

/// A cell on the context stack.
#[derive(Clone)]
pub enum ContextCell {
    /// An application context.
    App(Arc<AppContext>),
    /// A request context.
    Request(Arc<RequestContext>),
}

impl ContextCell {
    /// Returns the kind of this cell.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::App(_) => ContextKind::App,
            Self::Request(_) => ContextKind::Request,
        }
    }

    /// Returns the application context, if this is one.
    #[must_use]
    pub fn as_app(&self) -> Option<&Arc<AppContext>> {
        match self {
            Self::App(ctx) => Some(ctx),
            Self::Request(_) => None,
        }
    }

    /// Returns the request context, if this is one.
    #[must_use]
    pub fn as_request(&self) -> Option<&Arc<RequestContext>> {
        match self {
            Self::Request(ctx) => Some(ctx),
            Self::App(_) => None,
        }
    }
}

impl std::fmt::Debug for ContextCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::App(ctx) => f.debug_tuple("App").field(&ctx.id()).finish(),
            Self::Request(ctx) => f.debug_tuple("Request").field(&ctx.id()).finish(),
        }
    }
}

/// Identity of a single push, used to check that pops pair with pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushToken(u64);

impl PushToken {
    /// Returns the raw sequence number.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
struct Entry {
    token: u64,
    cell: ContextCell,
}

#[derive(Clone, Default)]
struct Frames {
    entries: Vec<Entry>,
}

tokio::task_local! {
    static TASK_STACK: RefCell<Frames>;
}

thread_local! {
    static THREAD_STACK: RefCell<Frames> = RefCell::new(Frames::default());
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Runs `f` against the stack of the current strand.
///
/// `f` must not re-enter the stack.
fn with_frames<R>(f: impl FnOnce(&mut Frames) -> R) -> R {
    if TASK_STACK.try_with(|_| ()).is_ok() {
        TASK_STACK.with(|stack| f(&mut stack.borrow_mut()))
    } else {
        THREAD_STACK.with(|stack| f(&mut stack.borrow_mut()))
    }
}

/// Runs a future as its own strand, with a fresh empty context stack.
pub fn strand<F: Future>(future: F) -> impl Future<Output = F::Output> {
    TASK_STACK.scope(RefCell::new(Frames::default()), future)
}

/// Spawns a future on the tokio runtime as its own strand.
pub fn spawn_strand<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(strand(future))
}

/// Runs `future` against a strand-local stack.
///
/// Inside a strand this is `future` itself. Elsewhere the future is scoped
/// to a copy of the current thread stack.
pub(crate) fn isolated<F: Future>(future: F) -> impl Future<Output = F::Output> {
    if in_strand() {
        Either::Left(future)
    } else {
        let seed = THREAD_STACK.with(|stack| stack.borrow().clone());
        Either::Right(TASK_STACK.scope(RefCell::new(seed), future))
    }
}

/// Returns true if the caller runs inside a [`strand`] scope.
#[must_use]
pub fn in_strand() -> bool {
    TASK_STACK.try_with(|_| ()).is_ok()
}

/// Operations on the current strand's context stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStack;

impl ContextStack {
    /// Pushes a cell, making it current for its kind.
    pub fn push(cell: ContextCell) -> PushToken {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        trace!(token, kind = %cell.kind(), "context push");
        with_frames(|frames| frames.entries.push(Entry { token, cell }));
        PushToken(token)
    }

    /// Removes and returns the top cell.
    pub fn pop() -> Result<ContextCell, StackError> {
        let entry = with_frames(|frames| frames.entries.pop()).ok_or(StackError::Empty)?;
        trace!(token = entry.token, kind = %entry.cell.kind(), "context pop");
        Ok(entry.cell)
    }

    /// Removes and returns the top cell if it was pushed with `token`.
    ///
    /// The stack is left untouched when the top belongs to another push.
    pub fn pop_expected(token: PushToken) -> Result<ContextCell, StackError> {
        let entry = with_frames(|frames| {
            let top = frames.entries.last().ok_or(StackError::Empty)?;
            if top.token != token.0 {
                return Err(StackError::Mismatch {
                    expected: token.0,
                    found: top.token,
                });
            }
            frames.entries.pop().ok_or(StackError::Empty)
        })?;
        trace!(token = entry.token, kind = %entry.cell.kind(), "context pop");
        Ok(entry.cell)
    }

    /// Returns the nearest cell of `kind`, scanning from the top.
    pub fn current(kind: ContextKind) -> Result<ContextCell, StackError> {
        with_frames(|frames| {
            if frames.entries.is_empty() {
                return Err(StackError::Empty);
            }
            frames
                .entries
                .iter()
                .rev()
                .find(|entry| entry.cell.kind() == kind)
                .map(|entry| entry.cell.clone())
                .ok_or(StackError::NoSuchContext { kind })
        })
    }

    /// Returns the nearest application context.
    pub fn current_app() -> Result<Arc<AppContext>, StackError> {
        match Self::current(ContextKind::App)? {
            ContextCell::App(ctx) => Ok(ctx),
            ContextCell::Request(_) => Err(StackError::NoSuchContext { kind: ContextKind::App }),
        }
    }

    /// Returns the nearest request context.
    pub fn current_request() -> Result<Arc<RequestContext>, StackError> {
        match Self::current(ContextKind::Request)? {
            ContextCell::Request(ctx) => Ok(ctx),
            ContextCell::App(_) => Err(StackError::NoSuchContext {
                kind: ContextKind::Request,
            }),
        }
    }

    /// Returns the top cell without removing it.
    #[must_use]
    pub fn top() -> Option<ContextCell> {
        with_frames(|frames| frames.entries.last().map(|entry| entry.cell.clone()))
    }

    /// Returns the number of cells on the stack.
    #[must_use]
    pub fn depth() -> usize {
        with_frames(|frames| frames.entries.len())
    }

    /// Returns true if the stack is empty.
    #[must_use]
    pub fn is_empty() -> bool {
        Self::depth() == 0
    }

    /// Pops cells until the stack holds at most `depth` entries.
    ///
    /// Returns how many cells were removed.
    pub fn truncate(depth: usize) -> usize {
        // Removed cells are dropped outside the borrow.
        let removed: Vec<Entry> = with_frames(|frames| {
            if frames.entries.len() > depth {
                frames.entries.split_off(depth)
            } else {
                Vec::new()
            }
        });
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;

    fn app_cell(app: &Arc<App>) -> ContextCell {
        ContextCell::App(app.app_context())
    }

    #[test]
    fn test_empty_stack_errors() {
        std::thread::spawn(|| {
            assert_eq!(ContextStack::pop().unwrap_err(), StackError::Empty);
            assert_eq!(
                ContextStack::current(ContextKind::App).unwrap_err(),
                StackError::Empty
            );
            assert!(ContextStack::top().is_none());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_current_distinguishes_missing_kind() {
        std::thread::spawn(|| {
            let app = App::new("stack").into_shared();
            let token = ContextStack::push(app_cell(&app));

            assert_eq!(
                ContextStack::current(ContextKind::Request).unwrap_err(),
                StackError::NoSuchContext { kind: ContextKind::Request }
            );
            assert!(ContextStack::current(ContextKind::App).is_ok());

            ContextStack::pop_expected(token).unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_push_pop_restores_previous() {
        std::thread::spawn(|| {
            let app = App::new("stack").into_shared();
            let outer = app.app_context();
            let inner = app.app_context();

            let t1 = ContextStack::push(ContextCell::App(outer.clone()));
            let t2 = ContextStack::push(ContextCell::App(inner.clone()));
            assert_eq!(ContextStack::current_app().unwrap().id(), inner.id());

            ContextStack::pop_expected(t2).unwrap();
            assert_eq!(ContextStack::current_app().unwrap().id(), outer.id());

            ContextStack::pop_expected(t1).unwrap();
            assert!(ContextStack::is_empty());
            assert_eq!(ContextStack::pop().unwrap_err(), StackError::Empty);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_pop_expected_mismatch_leaves_stack() {
        std::thread::spawn(|| {
            let app = App::new("stack").into_shared();
            let t1 = ContextStack::push(app_cell(&app));
            let t2 = ContextStack::push(app_cell(&app));

            let err = ContextStack::pop_expected(t1).unwrap_err();
            assert_eq!(
                err,
                StackError::Mismatch {
                    expected: t1.get(),
                    found: t2.get()
                }
            );
            assert_eq!(ContextStack::depth(), 2);

            ContextStack::pop_expected(t2).unwrap();
            ContextStack::pop_expected(t1).unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_truncate() {
        std::thread::spawn(|| {
            let app = App::new("stack").into_shared();
            ContextStack::push(app_cell(&app));
            ContextStack::push(app_cell(&app));
            ContextStack::push(app_cell(&app));

            assert_eq!(ContextStack::truncate(1), 2);
            assert_eq!(ContextStack::depth(), 1);
            assert_eq!(ContextStack::truncate(5), 0);
            ContextStack::truncate(0);
        })
        .join()
        .unwrap();
    }

    #[tokio::test]
    async fn test_strands_are_isolated() {
        let app = App::new("stack").into_shared();

        strand(async {
            ContextStack::push(app_cell(&app));
            assert!(in_strand());

            let app2 = app.clone();
            let child = spawn_strand(async move {
                let empty = ContextStack::is_empty();
                ContextStack::push(ContextCell::App(app2.app_context()));
                empty
            });
            assert!(child.await.unwrap());
            assert_eq!(ContextStack::depth(), 1);
            ContextStack::pop().unwrap();
        })
        .await;
    }
}
