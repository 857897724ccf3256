//! Derived-state cache.
//!
//! Reads combine the base state with a view computed by the configured
//! derive function. The view is memoized on the record and reused while the
//! record still holds the same base allocation, so derive runs at most once
//! per committed state.
//!
//! Derive failures are contained here: the hook is told, a warning is logged
//! in debug mode, and the caller gets the base state without a derived view.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::config::{DeriveFn, ErrorCallback};
use crate::error::{StoreFailure, panic_message};
use crate::record::{SharedRecord, Snapshot};

pub(crate) struct DeriveCache<S, D> {
    derive: Option<DeriveFn<S, D>>,
    on_error: Option<ErrorCallback<S>>,
    store: String,
    debug: bool,
}

impl<S, D> DeriveCache<S, D> {
    pub(crate) fn new(
        derive: Option<DeriveFn<S, D>>,
        on_error: Option<ErrorCallback<S>>,
        store: String,
        debug: bool,
    ) -> Self {
        Self {
            derive,
            on_error,
            store,
            debug,
        }
    }

    /// Snapshot of the record's current state, deriving if needed.
    ///
    /// The record lock is only held to look up or store the cache; derive
    /// and the error hook run unlocked.
    pub(crate) fn compute(&self, record: &SharedRecord<S, D>) -> Snapshot<S, D> {
        let (base, cached) = {
            let guard = record.lock().expect("instance record lock");
            (Arc::clone(&guard.state), guard.cached_for_current())
        };

        let Some(derive) = &self.derive else {
            return Snapshot::new(base, None);
        };

        if let Some(derived) = cached {
            trace!(store = %self.store, "derived state cache hit");
            return Snapshot::new(base, Some(derived));
        }

        match run_derive(derive, &base) {
            Ok(derived) => {
                let derived = Arc::new(derived);
                let mut guard = record.lock().expect("instance record lock");
                // Only cache against the state it was computed from.
                if Arc::ptr_eq(&guard.state, &base) {
                    guard.last_derived_base = Some(Arc::clone(&base));
                    guard.cached_derived = Some(Arc::clone(&derived));
                }
                trace!(store = %self.store, "derived state recomputed");
                Snapshot::new(base, Some(derived))
            }
            Err(message) => {
                if self.debug {
                    warn!(
                        store = %self.store,
                        error = %message,
                        "derive failed, serving base state"
                    );
                }
                if let Some(on_error) = &self.on_error {
                    on_error(&StoreFailure::derive(Arc::clone(&base), message));
                }
                Snapshot::new(base, None)
            }
        }
    }
}

/// Run derive, flattening both error returns and panics into a message.
fn run_derive<S, D>(derive: &DeriveFn<S, D>, base: &S) -> Result<D, String> {
    match catch_unwind(AssertUnwindSafe(|| derive(base))) {
        Ok(Ok(derived)) => Ok(derived),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}
