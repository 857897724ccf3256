//! Store: the public operation surface.
//!
//! Every mutating operation follows the same sequence against the record
//! chosen by the scope resolver:
//!
//! 1. compute the candidate state (reducer, replacement, merge, initial)
//! 2. fold it through the middleware pipeline
//! 3. commit to the record and drop the derived cache
//! 4. write through to the storage adapter (persistent scope only)
//! 5. fire the lifecycle hook
//!
//! A failure in steps 1–2 leaves the record untouched. Failures in 4–5 are
//! reported after the commit has already happened.

use std::sync::Arc;

use tracing::{info, trace, warn};

use crate::batch::Batch;
use crate::config::{Callbacks, ScopeMode, StoreConfig};
use crate::derive::DeriveCache;
use crate::error::{AdapterOp, StoreError, StoreResult};
use crate::middleware::{OperationKind, Pipeline};
use crate::patch::Patch;
use crate::record::{SharedRecord, Snapshot};
use crate::scope::{ScopeResolver, StoreId};

/// A state container. Cheap to clone; clones share the same records.
pub struct Store<S, D = ()> {
    inner: Arc<StoreInner<S, D>>,
}

impl<S, D> Clone for Store<S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<S, D> {
    name: String,
    scope: ScopeMode,
    debug: bool,
    resolver: ScopeResolver<S, D>,
    derived: DeriveCache<S, D>,
    pipeline: Pipeline<S>,
    callbacks: Callbacks<S>,
}

impl<S, D> Store<S, D>
where
    S: Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    pub fn new(config: StoreConfig<S, D>) -> Self {
        let StoreConfig {
            options,
            initial,
            derive,
            middleware,
            adapter,
            mut callbacks,
            request_scope,
        } = config;

        let resolver = ScopeResolver::new(
            options.name.clone(),
            options.scope,
            initial,
            adapter,
            request_scope,
            options.debug,
        );
        let derived = DeriveCache::new(
            derive,
            callbacks.on_error.take(),
            options.name.clone(),
            options.debug,
        );

        let pipeline = Pipeline::new(middleware);
        trace!(
            store = %options.name,
            scope = %options.scope,
            middleware = pipeline.len(),
            "store created"
        );

        Self {
            inner: Arc::new(StoreInner {
                name: options.name,
                scope: options.scope,
                debug: options.debug,
                resolver,
                derived,
                pipeline,
                callbacks,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scope(&self) -> ScopeMode {
        self.inner.scope
    }

    pub fn id(&self) -> StoreId {
        self.inner.resolver.id()
    }

    /// Whether the current scope's record has been initialized.
    pub async fn is_initialized(&self) -> StoreResult<bool> {
        let record = self.inner.resolver.resolve().await?;
        let initialized = record.lock().expect("instance record lock").initialized;
        Ok(initialized)
    }

    /// Replace the state and mark the record initialized.
    pub async fn initialize(&self, state: S) -> StoreResult<()> {
        let record = self.inner.resolver.resolve().await?;
        let previous = current(&record);
        self.commit(&record, OperationKind::Initialize, previous, state, true)
            .await
    }

    /// Base state plus derived view. Derive failures are absorbed.
    pub async fn read(&self) -> StoreResult<Snapshot<S, D>> {
        let record = self.inner.resolver.resolve().await?;
        if self.inner.debug {
            let initialized = record.lock().expect("instance record lock").initialized;
            if !initialized {
                warn!(store = %self.inner.name, "state read before initialize");
            }
        }
        Ok(self.inner.derived.compute(&record))
    }

    /// Project the current snapshot.
    pub async fn select<T, F>(&self, selector: F) -> StoreResult<T>
    where
        F: FnOnce(&Snapshot<S, D>) -> T,
    {
        let snapshot = self.read().await?;
        Ok(selector(&snapshot))
    }

    pub async fn update<F>(&self, reducer: F) -> StoreResult<()>
    where
        F: FnOnce(&S) -> S,
    {
        let record = self.inner.resolver.resolve().await?;
        let previous = current(&record);
        let next = reducer(&*previous);
        self.commit(&record, OperationKind::Update, previous, next, false)
            .await
    }

    /// Like [`Store::update`] for reducers that can fail. A failing reducer
    /// aborts before the pipeline runs.
    pub async fn try_update<F>(&self, reducer: F) -> StoreResult<()>
    where
        F: FnOnce(&S) -> anyhow::Result<S>,
    {
        let record = self.inner.resolver.resolve().await?;
        let previous = current(&record);
        let next = reducer(&*previous).map_err(StoreError::Reducer)?;
        self.commit(&record, OperationKind::Update, previous, next, false)
            .await
    }

    pub async fn set(&self, state: S) -> StoreResult<()> {
        let record = self.inner.resolver.resolve().await?;
        let previous = current(&record);
        self.commit(&record, OperationKind::Set, previous, state, true)
            .await
    }

    /// Shallow-merge `partial` into the current state.
    pub async fn patch<P>(&self, partial: P) -> StoreResult<()>
    where
        S: Patch<P>,
    {
        let record = self.inner.resolver.resolve().await?;
        let previous = current(&record);
        let next = previous.patched(partial);
        self.commit(&record, OperationKind::Patch, previous, next, false)
            .await
    }

    /// Return to a fresh evaluation of the initial state.
    pub async fn reset(&self) -> StoreResult<()> {
        let record = self.inner.resolver.resolve().await?;
        let previous = current(&record);
        let next = self.inner.resolver.initial().evaluate()?;
        self.commit(&record, OperationKind::Reset, previous, next, true)
            .await
    }

    /// Run several steps and commit them as a single operation.
    ///
    /// The callback is synchronous. Its steps are folded into one draft;
    /// afterwards the pipeline, commit, adapter write and `on_update` hook
    /// each run exactly once. An `Err` from the callback discards the draft.
    pub async fn batch<F>(&self, callback: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Batch<S>) -> anyhow::Result<()>,
    {
        let record = self.inner.resolver.resolve().await?;
        let initial = current(&record);
        let mut batch = Batch::new(S::clone(&initial));
        callback(&mut batch).map_err(StoreError::Batch)?;
        let (draft, steps, replaced) = batch.finish();
        trace!(store = %self.inner.name, steps, "batch collected");
        self.commit(&record, OperationKind::Batch, initial, draft, replaced)
            .await
    }

    async fn commit(
        &self,
        record: &SharedRecord<S, D>,
        kind: OperationKind,
        previous: Arc<S>,
        candidate: S,
        mark_initialized: bool,
    ) -> StoreResult<()> {
        let inner = &self.inner;
        let committed = Arc::new(
            inner
                .pipeline
                .apply(kind, Arc::clone(&previous), candidate)
                .await?,
        );

        record
            .lock()
            .expect("instance record lock")
            .commit(Arc::clone(&committed), mark_initialized);

        if inner.debug {
            info!(store = %inner.name, %kind, scope = %inner.scope, "state committed");
        } else {
            trace!(store = %inner.name, %kind, "state committed");
        }

        if let Some(adapter) = inner.resolver.write_target() {
            adapter
                .write(&committed)
                .await
                .map_err(|source| StoreError::Adapter {
                    op: AdapterOp::Write,
                    source,
                })?;
        }

        let callbacks = &inner.callbacks;
        let (hook, result) = match kind {
            OperationKind::Initialize => match &callbacks.on_initialize {
                Some(cb) => ("on_initialize", cb(committed).await),
                None => return Ok(()),
            },
            OperationKind::Reset => match &callbacks.on_reset {
                Some(cb) => ("on_reset", cb(committed).await),
                None => return Ok(()),
            },
            OperationKind::Update
            | OperationKind::Set
            | OperationKind::Patch
            | OperationKind::Batch => match &callbacks.on_update {
                Some(cb) => ("on_update", cb(previous, committed).await),
                None => return Ok(()),
            },
        };
        result.map_err(|source| StoreError::Callback { hook, source })
    }
}

fn current<S, D>(record: &SharedRecord<S, D>) -> Arc<S> {
    Arc::clone(&record.lock().expect("instance record lock").state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::middleware;
    use crate::scope::RequestContext;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        count: i64,
    }

    fn persistent_counter() -> Store<Counter> {
        Store::new(StoreConfig::new(Counter { count: 0 }).persistent())
    }

    #[tokio::test]
    async fn request_store_requires_active_request() {
        let store: Store<Counter> = Store::new(StoreConfig::new(Counter { count: 0 }).name("req"));
        let err = store.read().await.unwrap_err();
        assert!(matches!(err, StoreError::NoRequestScope { ref store } if store == "req"));
    }

    #[tokio::test]
    async fn update_set_patch_flow() {
        let store: Store<Value> = Store::new(StoreConfig::new(json!({"count": 0})).persistent());

        store
            .update(|s| json!({"count": s["count"].as_i64().unwrap() + 1}))
            .await
            .unwrap();
        assert_eq!(store.read().await.unwrap()["count"], 1);

        store.patch(json!({"label": "x"})).await.unwrap();
        assert_eq!(*store.read().await.unwrap(), json!({"count": 1, "label": "x"}));

        store.set(json!({"count": 9})).await.unwrap();
        assert_eq!(*store.read().await.unwrap(), json!({"count": 9}));
    }

    #[tokio::test]
    async fn initialization_state_machine() {
        let store = persistent_counter();
        assert!(!store.is_initialized().await.unwrap());

        store.update(|c| Counter { count: c.count + 1 }).await.unwrap();
        assert!(!store.is_initialized().await.unwrap());

        store.initialize(Counter { count: 5 }).await.unwrap();
        assert!(store.is_initialized().await.unwrap());

        store.reset().await.unwrap();
        assert!(store.is_initialized().await.unwrap());
        assert_eq!(store.read().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn set_marks_initialized() {
        let store = persistent_counter();
        store.set(Counter { count: 1 }).await.unwrap();
        assert!(store.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn batch_with_set_marks_initialized_but_update_only_does_not() {
        let store = persistent_counter();
        store
            .batch(|b| {
                b.update(|c| Counter { count: c.count + 1 });
                Ok(())
            })
            .await
            .unwrap();
        assert!(!store.is_initialized().await.unwrap());

        store
            .batch(|b| {
                b.set(Counter { count: 10 });
                Ok(())
            })
            .await
            .unwrap();
        assert!(store.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn failing_reducer_leaves_state() {
        let store = persistent_counter();
        store.set(Counter { count: 3 }).await.unwrap();
        let err = store
            .try_update(|_| Err(anyhow::anyhow!("refused")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Reducer(_)));
        assert_eq!(store.read().await.unwrap().count, 3);
    }

    #[tokio::test]
    async fn batch_callback_error_discards_draft() {
        let updates = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&updates);
        let store: Store<Counter> = Store::new(
            StoreConfig::new(Counter { count: 1 })
                .persistent()
                .on_update(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }),
        );
        let err = store
            .batch(|b| {
                b.update(|c| Counter { count: c.count * 100 });
                Err(anyhow::anyhow!("abandon"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Batch(_)));
        assert_eq!(store.read().await.unwrap().count, 1);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hooks_fire_per_operation_kind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let store: Store<Counter> = Store::new(
            StoreConfig::new(Counter { count: 0 })
                .persistent()
                .on_initialize(move |s| {
                    a.lock().unwrap().push(format!("init {}", s.count));
                    async { Ok(()) }
                })
                .on_update(move |prev, next| {
                    b.lock().unwrap().push(format!("update {}->{}", prev.count, next.count));
                    async { Ok(()) }
                })
                .on_reset(move |s| {
                    c.lock().unwrap().push(format!("reset {}", s.count));
                    async { Ok(()) }
                }),
        );

        store.initialize(Counter { count: 2 }).await.unwrap();
        store.set(Counter { count: 3 }).await.unwrap();
        store.reset().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["init 2".to_string(), "update 2->3".to_string(), "reset 0".to_string()]
        );
    }

    #[tokio::test]
    async fn on_update_sees_state_after_middleware() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let store: Store<Value> = Store::new(
            StoreConfig::new(json!({"count": 0}))
                .persistent()
                .with_middleware(middleware::map(
                    "scale",
                    |op: middleware::Operation<Value>| {
                        let count = op.next["count"].as_i64().unwrap_or_default();
                        let mut next = op.next;
                        next["count"] = json!(count * 10);
                        Ok(next)
                    },
                ))
                .on_update(move |prev, next| {
                    log.lock()
                        .unwrap()
                        .push((prev["count"].as_i64(), next["count"].as_i64()));
                    async { Ok(()) }
                }),
        );

        store
            .update(|s| json!({"count": s["count"].as_i64().unwrap_or_default() + 1}))
            .await
            .unwrap();
        store.patch(json!({"count": 2})).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some(0), Some(10)), (Some(10), Some(20))]
        );
        assert_eq!(store.read().await.unwrap()["count"], 20);
    }

    #[tokio::test]
    async fn callback_failure_happens_after_commit_and_write() {
        let adapter = Arc::new(MemoryAdapter::<Counter>::new());
        let store: Store<Counter> = Store::new(
            StoreConfig::new(Counter { count: 0 })
                .persistent()
                .with_adapter(adapter.clone())
                .on_update(|_, _| async { Err(anyhow::anyhow!("listener crashed")) }),
        );

        let err = store.set(Counter { count: 8 }).await.unwrap_err();
        assert!(matches!(err, StoreError::Callback { hook: "on_update", .. }));
        assert_eq!(store.read().await.unwrap().count, 8);
        assert_eq!(adapter.stored(), Some(Counter { count: 8 }));
    }

    #[tokio::test]
    async fn adapter_write_failure_keeps_in_memory_commit() {
        struct BrokenWrites;

        #[async_trait::async_trait]
        impl crate::adapter::StorageAdapter<Counter> for BrokenWrites {
            async fn read(&self) -> anyhow::Result<Option<Counter>> {
                Ok(None)
            }
            async fn write(&self, _: &Counter) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("disk full"))
            }
        }

        let store: Store<Counter> = Store::new(
            StoreConfig::new(Counter { count: 0 })
                .persistent()
                .with_adapter(Arc::new(BrokenWrites)),
        );
        let err = store.set(Counter { count: 4 }).await.unwrap_err();
        assert!(matches!(err, StoreError::Adapter { op: AdapterOp::Write, .. }));
        assert_eq!(store.read().await.unwrap().count, 4);
    }

    #[tokio::test]
    async fn adapter_is_ignored_in_request_scope() {
        let adapter = Arc::new(MemoryAdapter::with_value(Counter { count: 99 }));
        let store: Store<Counter> = Store::new(
            StoreConfig::new(Counter { count: 0 }).with_adapter(adapter.clone()),
        );

        RequestContext::new()
            .scope(async {
                assert_eq!(store.read().await.unwrap().count, 0);
                store.set(Counter { count: 1 }).await.unwrap();
            })
            .await;

        assert_eq!(adapter.read_count(), 0);
        assert_eq!(adapter.write_count(), 0);
    }

    #[tokio::test]
    async fn adapter_written_once_per_operation() {
        let adapter = Arc::new(MemoryAdapter::<Counter>::new());
        let store: Store<Counter> = Store::new(
            StoreConfig::new(Counter { count: 0 })
                .persistent()
                .with_adapter(adapter.clone())
                .with_middleware(middleware::map("clamp", |op: middleware::Operation<Counter>| {
                    Ok(Counter { count: op.next.count.min(10) })
                })),
        );

        store.initialize(Counter { count: 1 }).await.unwrap();
        store.update(|c| Counter { count: c.count + 50 }).await.unwrap();
        store
            .batch(|b| {
                b.update(|c| Counter { count: c.count - 1 });
                b.update(|c| Counter { count: c.count - 1 });
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(adapter.write_count(), 3);
        assert_eq!(adapter.stored(), Some(Counter { count: 8 }));
    }

    #[tokio::test]
    async fn reset_reevaluates_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store: Store<Counter> = Store::new(
            StoreConfig::with_factory(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
                Ok(Counter { count: n * 100 })
            })
            .persistent(),
        );

        assert_eq!(store.read().await.unwrap().count, 0);
        store.reset().await.unwrap();
        assert_eq!(store.read().await.unwrap().count, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn select_projects_snapshot() {
        let store: Store<Counter, i64> = Store::new(
            StoreConfig::new(Counter { count: 4 })
                .persistent()
                .with_derive(|c: &Counter| Ok(c.count * c.count)),
        );
        let squared = store.select(|s| s.derived().copied()).await.unwrap();
        assert_eq!(squared, Some(16));
        let count = store.select(|s| s.count).await.unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn clones_share_records() {
        let store = persistent_counter();
        let other = store.clone();
        other.set(Counter { count: 12 }).await.unwrap();
        assert_eq!(store.read().await.unwrap().count, 12);
        assert_eq!(store.id(), other.id());
    }

    #[tokio::test]
    async fn stores_are_independent() {
        let a = persistent_counter();
        let b = persistent_counter();
        a.set(Counter { count: 1 }).await.unwrap();
        assert_eq!(b.read().await.unwrap().count, 0);
        assert_ne!(a.id(), b.id());
    }
}
