//! One-shot messages carried in the session from one request to the next.
//!
//! Flashes are stored under [`FLASHES_KEY`] as a JSON array of
//! `[category, message]` pairs. The first read in a request removes them
//! from the session and caches them on the request context, so every later
//! read in the same request sees the same list.

use crate::context::{request_context, FlashList};
use crate::errors::ScopeError;
use crate::session::Session;
use serde_json::Value;
use tracing::debug;

/// Session key holding pending flashes.
pub const FLASHES_KEY: &str = "_flashes";

/// Category given to messages flashed without one.
pub const DEFAULT_CATEGORY: &str = "message";

/// Queues `message` under `category` for a later request.
///
/// Fails with [`ScopeError::SessionUnavailable`] when the session is null.
pub fn flash(message: impl Into<String>, category: Option<&str>) -> Result<(), ScopeError> {
    let ctx = request_context()?;
    let session = ctx.session();
    if session.is_null() {
        return Err(ScopeError::SessionUnavailable);
    }

    let mut flashes = stored_flashes(&session)?;
    let category = category.unwrap_or(DEFAULT_CATEGORY).to_string();
    flashes.push((category, message.into()));
    debug!(request_ctx = %ctx.id(), pending = flashes.len(), "flashed message");
    session.set(FLASHES_KEY, serde_json::to_value(&flashes)?)
}

/// Returns the flashed messages, optionally limited to some categories.
///
/// An empty `category_filter` keeps every message.
pub fn get_flashed_messages(category_filter: &[&str]) -> Result<Vec<String>, ScopeError> {
    Ok(get_flashed_messages_with_categories(category_filter)?
        .into_iter()
        .map(|(_, message)| message)
        .collect())
}

/// Returns the flashed messages as `(category, message)` pairs.
pub fn get_flashed_messages_with_categories(
    category_filter: &[&str],
) -> Result<Vec<(String, String)>, ScopeError> {
    let ctx = request_context()?;
    let flashes = ctx.cached_flashes(|session| {
        if session.contains_key(FLASHES_KEY) {
            let flashes = stored_flashes(session)?;
            session.remove(FLASHES_KEY)?;
            Ok(flashes)
        } else {
            Ok(FlashList::new())
        }
    })?;

    if category_filter.is_empty() {
        return Ok(flashes);
    }
    Ok(flashes
        .into_iter()
        .filter(|(category, _)| category_filter.contains(&category.as_str()))
        .collect())
}

fn stored_flashes(session: &Session) -> Result<FlashList, ScopeError> {
    match session.get(FLASHES_KEY) {
        None | Some(Value::Null) => Ok(FlashList::new()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}
