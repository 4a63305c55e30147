//! Hold counting and teardown-once bookkeeping shared by context cells.

use crate::errors::TeardownError;
use crate::teardown::TeardownRegistry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::warn;

/// Tracks who keeps a context alive and runs its teardown exactly once.
///
/// Pushes, dependent request contexts, and captured snapshots each take a
/// hold. The release that drops the count to zero runs the teardown.
#[derive(Debug, Default)]
pub(crate) struct Lifetime {
    holds: AtomicUsize,
    torn_down: AtomicBool,
    teardown: TeardownRegistry,
}

impl Lifetime {
    pub(crate) fn new(teardown: TeardownRegistry) -> Self {
        Self {
            holds: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
            teardown,
        }
    }

    /// Takes a hold. Returns false if the context was already torn down.
    pub(crate) fn retain(&self) -> bool {
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }
        self.holds.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Drops a hold, running `finalize` if it was the last one.
    ///
    /// `finalize` receives the registry; the returned flag reports whether
    /// teardown ran during this call.
    pub(crate) fn release<F>(&self, finalize: F) -> (bool, Result<(), TeardownError>)
    where
        F: FnOnce(&TeardownRegistry) -> Result<(), TeardownError>,
    {
        let previous = self
            .holds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                if self
                    .torn_down
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    (true, finalize(&self.teardown))
                } else {
                    (false, Ok(()))
                }
            }
            Ok(_) => (false, Ok(())),
            Err(_) => {
                warn!("Released a context that holds no references");
                (false, Ok(()))
            }
        }
    }

    pub(crate) fn holds(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub(crate) fn registry(&self) -> &TeardownRegistry {
        &self.teardown
    }
}
