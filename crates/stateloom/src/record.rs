//! Instance records and read snapshots.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

/// Mutable container for one scope's state.
///
/// The derived cache is only valid while `state` is the same allocation as
/// `last_derived_base`; [`InstanceRecord::commit`] clears both together.
#[derive(Debug)]
pub struct InstanceRecord<S, D> {
    pub(crate) state: Arc<S>,
    pub(crate) initialized: bool,
    pub(crate) last_derived_base: Option<Arc<S>>,
    pub(crate) cached_derived: Option<Arc<D>>,
}

impl<S, D> InstanceRecord<S, D> {
    pub(crate) fn new(state: S, initialized: bool) -> Self {
        Self {
            state: Arc::new(state),
            initialized,
            last_derived_base: None,
            cached_derived: None,
        }
    }

    /// Replace the state and drop any derived value computed from the old one.
    pub(crate) fn commit(&mut self, state: Arc<S>, mark_initialized: bool) {
        self.state = state;
        if mark_initialized {
            self.initialized = true;
        }
        self.invalidate();
    }

    pub(crate) fn invalidate(&mut self) {
        self.last_derived_base = None;
        self.cached_derived = None;
    }

    /// Cached derived value, if it was computed from the current state.
    pub(crate) fn cached_for_current(&self) -> Option<Arc<D>> {
        match (&self.last_derived_base, &self.cached_derived) {
            (Some(base), Some(derived)) if Arc::ptr_eq(base, &self.state) => {
                Some(Arc::clone(derived))
            }
            _ => None,
        }
    }
}

/// Shared handle to an instance record.
pub type SharedRecord<S, D> = Arc<Mutex<InstanceRecord<S, D>>>;

pub(crate) fn shared<S, D>(record: InstanceRecord<S, D>) -> SharedRecord<S, D> {
    Arc::new(Mutex::new(record))
}

/// What `read` returns: the base state plus the derived view, if any.
///
/// Dereferences to the base state. `derived()` is `None` when no derive
/// function is configured or when it failed for this base state.
#[derive(Debug)]
pub struct Snapshot<S, D> {
    base: Arc<S>,
    derived: Option<Arc<D>>,
}

impl<S, D> Clone for Snapshot<S, D> {
    fn clone(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            derived: self.derived.clone(),
        }
    }
}

impl<S, D> Snapshot<S, D> {
    pub(crate) fn new(base: Arc<S>, derived: Option<Arc<D>>) -> Self {
        Self { base, derived }
    }

    pub fn base(&self) -> &S {
        &self.base
    }

    /// The shared base allocation. Pointer-equal across reads with no
    /// intervening mutation.
    pub fn base_arc(&self) -> &Arc<S> {
        &self.base
    }

    pub fn derived(&self) -> Option<&D> {
        self.derived.as_deref()
    }

    pub fn derived_arc(&self) -> Option<&Arc<D>> {
        self.derived.as_ref()
    }

    pub fn into_parts(self) -> (Arc<S>, Option<Arc<D>>) {
        (self.base, self.derived)
    }
}

impl<S, D> Deref for Snapshot<S, D> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.base
    }
}
