//! Keeping a request context current while a body is produced lazily.
//!
//! A handler returns before its streamed body is pulled, so its request
//! context would normally be popped and torn down by then. The types here
//! capture the current contexts, hold them open, and re-enter them around
//! each resumption of the wrapped stream or future, on whatever strand polls
//! it.

mod snapshot;
mod stream;

pub use snapshot::{with_captured_context, CapturedContext, CloseHandle, ContextFuture, EnteredScope};
pub use stream::{stream_with_context, ContextStream};
