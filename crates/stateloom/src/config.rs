//! Store configuration.
//!
//! [`StoreOptions`] is the serializable part (name, scope, debug) and can be
//! loaded from TOML. [`StoreConfig`] adds the runtime pieces that cannot be
//! serialized: initial state, derive function, middleware, adapter, hooks.
//! A config is consumed by [`crate::Store::new`] and never changes after.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::StorageAdapter;
use crate::error::{StoreError, StoreFailure, StoreResult};
use crate::middleware::Middleware;
use crate::scope::{RequestScope, TaskLocalScope};

/// Lifetime of the instance record a store operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// One record per logical request.
    #[default]
    Request,
    /// One record shared by every caller for the life of the store.
    Persistent,
}

impl std::fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeMode::Request => f.write_str("request"),
            ScopeMode::Persistent => f.write_str("persistent"),
        }
    }
}

/// Serializable store settings.
///
/// ```toml
/// name = "cart"
/// scope = "persistent"
/// debug = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreOptions {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub scope: ScopeMode,
    #[serde(default)]
    pub debug: bool,
}

fn default_name() -> String {
    "store".to_string()
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            name: default_name(),
            scope: ScopeMode::default(),
            debug: false,
        }
    }
}

impl StoreOptions {
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        toml::from_str(content).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}

/// Boxed future returned by lifecycle hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Zero-argument initial state factory.
pub type StateFactory<S> = Arc<dyn Fn() -> anyhow::Result<S> + Send + Sync>;

/// Base state → derived view.
pub type DeriveFn<S, D> = Arc<dyn Fn(&S) -> anyhow::Result<D> + Send + Sync>;

/// Called with the committed state after `initialize` or `reset`.
pub type StateCallback<S> =
    Arc<dyn Fn(Arc<S>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Called with `(previous, committed)` after update/set/patch/batch.
pub type UpdateCallback<S> =
    Arc<dyn Fn(Arc<S>, Arc<S>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Receives contained failures (derive errors).
pub type ErrorCallback<S> = Arc<dyn Fn(&StoreFailure<S>) + Send + Sync>;

/// Where a fresh record's state comes from.
pub enum InitialState<S> {
    Value(S),
    Factory(StateFactory<S>),
}

impl<S: Clone> InitialState<S> {
    /// Produce a fresh initial state. Factories run on every call.
    pub fn evaluate(&self) -> StoreResult<S> {
        match self {
            InitialState::Value(value) => Ok(value.clone()),
            InitialState::Factory(factory) => factory().map_err(StoreError::Factory),
        }
    }
}

/// Optional lifecycle hooks.
pub struct Callbacks<S> {
    pub on_initialize: Option<StateCallback<S>>,
    pub on_update: Option<UpdateCallback<S>>,
    pub on_reset: Option<StateCallback<S>>,
    pub on_error: Option<ErrorCallback<S>>,
}

impl<S> Default for Callbacks<S> {
    fn default() -> Self {
        Self {
            on_initialize: None,
            on_update: None,
            on_reset: None,
            on_error: None,
        }
    }
}

/// Everything a store needs. Unset fields mean: no derive (reads return the
/// base only), no middleware (identity pipeline), no adapter (no external
/// persistence), no hooks.
pub struct StoreConfig<S, D = ()> {
    pub options: StoreOptions,
    pub initial: InitialState<S>,
    pub derive: Option<DeriveFn<S, D>>,
    pub middleware: Vec<Arc<dyn Middleware<S>>>,
    pub adapter: Option<Arc<dyn StorageAdapter<S>>>,
    pub callbacks: Callbacks<S>,
    pub request_scope: Arc<dyn RequestScope>,
}

impl<S, D> StoreConfig<S, D> {
    /// Config with a fixed initial value and default options.
    pub fn new(initial: S) -> Self {
        Self::from_options(StoreOptions::default(), InitialState::Value(initial))
    }

    /// Config whose initial state is produced by `factory` for every new
    /// record and on every `reset`.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
    {
        Self::from_options(
            StoreOptions::default(),
            InitialState::Factory(Arc::new(factory)),
        )
    }

    pub fn from_options(options: StoreOptions, initial: InitialState<S>) -> Self {
        Self {
            options,
            initial,
            derive: None,
            middleware: Vec::new(),
            adapter: None,
            callbacks: Callbacks::default(),
            request_scope: Arc::new(TaskLocalScope),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    pub fn scope(mut self, scope: ScopeMode) -> Self {
        self.options.scope = scope;
        self
    }

    pub fn persistent(self) -> Self {
        self.scope(ScopeMode::Persistent)
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    pub fn with_derive<F>(self, derive: F) -> Self
    where
        F: Fn(&S) -> anyhow::Result<D> + Send + Sync + 'static,
    {
        Self {
            derive: Some(Arc::new(derive)),
            ..self
        }
    }

    /// Append a stage to the end of the pipeline.
    pub fn with_middleware(mut self, stage: Arc<dyn Middleware<S>>) -> Self {
        self.middleware.push(stage);
        self
    }

    pub fn with_adapter(self, adapter: Arc<dyn StorageAdapter<S>>) -> Self {
        Self {
            adapter: Some(adapter),
            ..self
        }
    }

    pub fn with_request_scope(self, request_scope: Arc<dyn RequestScope>) -> Self {
        Self {
            request_scope,
            ..self
        }
    }

    pub fn on_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callbacks.on_initialize = Some(Arc::new(
            move |state: Arc<S>| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(state)) },
        ));
        self
    }

    pub fn on_update<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<S>, Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callbacks.on_update = Some(Arc::new(
            move |previous: Arc<S>, next: Arc<S>| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(f(previous, next))
            },
        ));
        self
    }

    pub fn on_reset<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callbacks.on_reset = Some(Arc::new(
            move |state: Arc<S>| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(state)) },
        ));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StoreFailure<S>) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }
}
