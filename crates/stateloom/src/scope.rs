//! Scope resolution: which instance record an operation runs against.
//!
//! Two providers:
//! - **Request**: one record per logical request, memoized in the current
//!   [`RequestContext`] and dropped with it.
//! - **Persistent**: one record per store for the life of the store,
//!   created on first access and optionally seeded from a storage adapter.
//!   Concurrent first accesses share a single in-flight seed.
//!
//! A logical request is whatever the host wraps in
//! [`RequestContext::scope`]. The context is task-local: tasks spawned from
//! inside a request do not inherit it unless the host passes the context
//! along and re-enters it.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::adapter::StorageAdapter;
use crate::config::{InitialState, ScopeMode};
use crate::error::{AdapterOp, StoreError, StoreResult};
use crate::record::{InstanceRecord, SharedRecord};

/// Process-unique identity of a store, used as the request slot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StoreId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

tokio::task_local! {
    static CURRENT_REQUEST: RequestContext;
}

/// Per-request slot map. One value per store, created on first use and
/// discarded when the last clone of the context is dropped.
#[derive(Clone, Default)]
pub struct RequestContext {
    slots: Arc<Mutex<HashMap<StoreId, Arc<dyn Any + Send + Sync>>>>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("slots", &self.len())
            .finish()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` as one logical request.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_REQUEST.scope(self, fut).await
    }

    /// Synchronous counterpart of [`RequestContext::scope`].
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT_REQUEST.sync_scope(self, f)
    }

    /// The context of the logical request the caller is running in.
    pub fn current() -> Option<Self> {
        CURRENT_REQUEST.try_with(Clone::clone).ok()
    }

    /// Return the value memoized under `key`, creating it with `factory`
    /// on first use. A failing factory leaves the slot empty.
    pub fn memoize<T, E, F>(&self, key: StoreId, factory: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(existing) = self.lookup::<T>(key) {
            return Ok(existing);
        }

        // The factory runs unlocked so it may touch other stores in the
        // same request.
        let created = Arc::new(factory()?);

        let mut slots = self.slots.lock().expect("request slots lock");
        // Another caller may have filled the slot while the factory ran.
        if let Some(existing) = slots
            .get(&key)
            .and_then(|slot| Arc::clone(slot).downcast::<T>().ok())
        {
            return Ok(existing);
        }
        slots.insert(key, Arc::clone(&created) as Arc<dyn Any + Send + Sync>);
        Ok(created)
    }

    fn lookup<T: Any + Send + Sync>(&self, key: StoreId) -> Option<Arc<T>> {
        let slots = self.slots.lock().expect("request slots lock");
        slots
            .get(&key)
            .and_then(|slot| Arc::clone(slot).downcast::<T>().ok())
    }

    /// Number of stores that have materialized a record in this request.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("request slots lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host capability that tells the engine which logical request is active.
pub trait RequestScope: Send + Sync {
    fn current(&self) -> Option<RequestContext>;
}

/// Default provider: the context entered with [`RequestContext::scope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalScope;

impl RequestScope for TaskLocalScope {
    fn current(&self) -> Option<RequestContext> {
        RequestContext::current()
    }
}

/// Picks the instance record for a store according to its scope mode.
pub(crate) struct ScopeResolver<S, D> {
    id: StoreId,
    name: String,
    mode: ScopeMode,
    initial: InitialState<S>,
    adapter: Option<Arc<dyn StorageAdapter<S>>>,
    request_scope: Arc<dyn RequestScope>,
    persistent: OnceCell<SharedRecord<S, D>>,
    debug: bool,
}

impl<S, D> ScopeResolver<S, D>
where
    S: Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    pub(crate) fn new(
        name: String,
        mode: ScopeMode,
        initial: InitialState<S>,
        adapter: Option<Arc<dyn StorageAdapter<S>>>,
        request_scope: Arc<dyn RequestScope>,
        debug: bool,
    ) -> Self {
        Self {
            id: StoreId::next(),
            name,
            mode,
            initial,
            adapter,
            request_scope,
            persistent: OnceCell::new(),
            debug,
        }
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub(crate) fn initial(&self) -> &InitialState<S> {
        &self.initial
    }

    /// Adapter to write through to, if this scope persists at all.
    pub(crate) fn write_target(&self) -> Option<&Arc<dyn StorageAdapter<S>>> {
        match self.mode {
            ScopeMode::Persistent => self.adapter.as_ref(),
            ScopeMode::Request => None,
        }
    }

    pub(crate) async fn resolve(&self) -> StoreResult<SharedRecord<S, D>> {
        match self.mode {
            ScopeMode::Request => {
                let ctx = self
                    .request_scope
                    .current()
                    .ok_or_else(|| StoreError::NoRequestScope {
                        store: self.name.clone(),
                    })?;
                ctx.memoize(self.id, || {
                    let state = self.initial.evaluate()?;
                    Ok::<_, StoreError>(Mutex::new(InstanceRecord::new(state, false)))
                })
            }
            ScopeMode::Persistent => self
                .persistent
                .get_or_try_init(|| self.seed_persistent())
                .await
                .cloned(),
        }
    }

    async fn seed_persistent(&self) -> StoreResult<SharedRecord<S, D>> {
        if let Some(adapter) = &self.adapter {
            let stored = adapter
                .read()
                .await
                .map_err(|source| StoreError::Adapter {
                    op: AdapterOp::Read,
                    source,
                })?;
            if let Some(state) = stored {
                if self.debug {
                    info!(store = %self.name, "persistent state seeded from adapter");
                }
                return Ok(crate::record::shared(InstanceRecord::new(state, true)));
            }
        }

        let state = self.initial.evaluate()?;
        if self.debug {
            info!(store = %self.name, "persistent state seeded from initial value");
        } else {
            debug!(store = %self.name, "persistent state created");
        }
        Ok(crate::record::shared(InstanceRecord::new(state, false)))
    }
}
