//! Teardown registry for context cells.

use crate::errors::TeardownError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// A shareable teardown callback.
pub type TeardownFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A callback for teardown, with a name for diagnostics.
#[derive(Clone)]
pub struct TeardownCallback {
    /// The callback function.
    callback: TeardownFn,
    /// Name reported when the callback fails.
    name: String,
}

impl TeardownCallback {
    /// Creates a named teardown callback.
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            name: name.into(),
        }
    }

    /// Returns the callback name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TeardownCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownCallback")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry for teardown callbacks executed in LIFO order.
#[derive(Default)]
pub struct TeardownRegistry {
    callbacks: Mutex<Vec<TeardownCallback>>,
}

impl TeardownRegistry {
    /// Creates a new teardown registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with callbacks.
    #[must_use]
    pub fn with_callbacks(callbacks: impl IntoIterator<Item = TeardownCallback>) -> Self {
        Self {
            callbacks: Mutex::new(callbacks.into_iter().collect()),
        }
    }

    /// Registers a teardown callback.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(TeardownCallback::new(name, callback));
    }

    /// Registers an already constructed callback.
    pub fn push(&self, callback: TeardownCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Removes every callback registered under `name`.
    ///
    /// Returns true if a callback was removed.
    pub fn unregister_by_name(&self, name: &str) -> bool {
        let mut callbacks = self.callbacks.lock();
        let initial_len = callbacks.len();
        callbacks.retain(|cb| cb.name != name);
        callbacks.len() < initial_len
    }

    /// Runs all callbacks in LIFO order and clears the registry.
    ///
    /// Every callback is attempted, including after earlier failures or
    /// panics. The first failure is returned once all have run.
    pub fn run_all(&self) -> Result<(), TeardownError> {
        let callbacks: Vec<TeardownCallback> = std::mem::take(&mut *self.callbacks.lock());
        let attempted = callbacks.len();
        let mut first: Option<TeardownError> = None;
        let mut failed = 0;

        for entry in callbacks.into_iter().rev() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (entry.callback)()
            }));

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => anyhow::anyhow!("teardown callback panicked: {}", panic_message(&*panic)),
            };

            warn!(callback = %entry.name, error = %error, "Teardown callback failed");
            failed += 1;
            if first.is_none() {
                first = Some(TeardownError::new(entry.name, error));
            }
        }

        match first {
            Some(err) => Err(err.with_counts(failed, attempted)),
            None => Ok(()),
        }
    }

    /// Returns the number of pending teardown callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Clears all registered callbacks without running them.
    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }
}

impl std::fmt::Debug for TeardownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

/// Folds several teardown outcomes, keeping the first failure.
pub(crate) fn first_failure(
    results: impl IntoIterator<Item = Result<(), TeardownError>>,
) -> Result<(), TeardownError> {
    results
        .into_iter()
        .fold(Ok(()), |acc, next| match (acc, next) {
            (Ok(()), next) => next,
            (Err(first), Ok(())) => Err(first),
            (Err(first), Err(later)) => Err(first.merge(later)),
        })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "<non-string panic>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registry_creation() {
        let registry = TeardownRegistry::new();
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.run_all().is_ok());
    }

    #[test]
    fn test_registry_lifo_order() {
        let registry = TeardownRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 1..=3 {
            let order = order.clone();
            registry.register(format!("cb{i}"), move || {
                order.lock().push(i);
                Ok(())
            });
        }

        registry.run_all().unwrap();

        assert_eq!(*order.lock(), vec![3, 2, 1]);
    }

    #[test]
    fn test_registry_clears_after_run() {
        let registry = TeardownRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        registry.register("count", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.run_all().unwrap();
        registry.run_all().unwrap();

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_continues_on_failure_and_reports_first() {
        let registry = TeardownRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = counter.clone();
        registry.register("first", move || {
            c1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry.register("fails-early", || Err(anyhow::anyhow!("early")));
        registry.register("panics", || panic!("Intentional"));
        let c2 = counter.clone();
        registry.register("last", move || {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = registry.run_all().unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        // LIFO: "panics" runs before "fails-early"
        assert_eq!(err.name, "panics");
        assert_eq!(err.failed, 2);
        assert_eq!(err.attempted, 4);
        assert!(err.source.to_string().contains("Intentional"));
    }

    #[test]
    fn test_unregister_by_name() {
        let registry = TeardownRegistry::new();
        registry.register("keep", || Ok(()));
        registry.register("remove", || Ok(()));
        registry.register("keep2", || Ok(()));

        assert!(registry.unregister_by_name("remove"));
        assert_eq!(registry.pending_count(), 2);
        assert!(!registry.unregister_by_name("nonexistent"));
    }
}
