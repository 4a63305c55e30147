//! Application and request contexts and the strand-local stack they live on.
//!
//! This module provides:
//! - The strand-local [`ContextStack`] with push/pop/current primitives
//! - [`AppContext`] and [`RequestContext`] cells with teardown-once lifetimes
//! - Lookups for the current application, request, session and globals

mod app_ctx;
mod current;
mod globals;
mod lifetime;
mod request_ctx;
mod stack;

pub use app_ctx::AppContext;
pub use current::{
    app_context, current_app, current_request, current_session, g, has_app_context,
    has_request_context, request_context,
};
pub use globals::Globals;
pub use request_ctx::RequestContext;
pub use stack::{in_strand, spawn_strand, strand, ContextCell, ContextStack, PushToken};

pub(crate) use request_ctx::FlashList;

use crate::errors::ScopeError;
use tracing::warn;

/// Pops a context when dropped, unless [`PopGuard::finish`] already did.
pub(crate) struct PopGuard {
    cell: Option<ContextCell>,
}

impl PopGuard {
    pub(crate) fn new(cell: ContextCell) -> Self {
        Self { cell: Some(cell) }
    }

    pub(crate) fn finish(mut self) -> Result<(), ScopeError> {
        self.cell.take().map_or(Ok(()), |cell| pop_cell(&cell))
    }
}

impl Drop for PopGuard {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            if let Err(err) = pop_cell(&cell) {
                warn!(error = %err, "Failed to pop context of a dropped scope");
            }
        }
    }
}

fn pop_cell(cell: &ContextCell) -> Result<(), ScopeError> {
    match cell {
        ContextCell::App(ctx) => ctx.pop(),
        ContextCell::Request(ctx) => ctx.pop(),
    }
}
