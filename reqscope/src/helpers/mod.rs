//! Request-time helpers: URL building, file responses, and re-exports of
//! the flash, streaming and response helpers handlers reach for.

mod files;
mod url;

pub use files::{safe_join, send_file, send_from_directory, FileSource, SendFileOptions};
pub use url::{url_for, UrlOptions};

pub use crate::flash::{flash, get_flashed_messages, get_flashed_messages_with_categories};
pub use crate::streaming::{stream_with_context, with_captured_context};
pub use crate::wrappers::make_response;
