//! Middleware pipeline: ordered transformer stages for mutating operations.
//!
//! Every mutating call (or a whole batch) builds one [`Operation`] and folds
//! it through the configured stages left to right. Each stage sees the
//! output of the previous one as `next` and returns the state the following
//! stage receives. Stages are awaited one at a time; the first failure
//! aborts the fold and nothing is committed.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};

/// The mutating operation a pipeline pass was triggered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Initialize,
    Update,
    Set,
    Patch,
    Reset,
    Batch,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Initialize => "initialize",
            OperationKind::Update => "update",
            OperationKind::Set => "set",
            OperationKind::Patch => "patch",
            OperationKind::Reset => "reset",
            OperationKind::Batch => "batch",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input handed to each middleware stage.
#[derive(Debug, Clone)]
pub struct Operation<S> {
    pub kind: OperationKind,
    /// Committed state before this operation.
    pub previous: Arc<S>,
    /// Candidate state produced by the operation or the prior stage.
    pub next: S,
}

/// A single pipeline stage.
#[async_trait]
pub trait Middleware<S>: Send + Sync {
    /// Stage name used in logs and errors.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Transform the candidate state. The returned value becomes `next`
    /// for the following stage.
    async fn handle(&self, op: Operation<S>) -> anyhow::Result<S>;
}

/// Ordered list of stages, applied once per mutating call.
pub struct Pipeline<S> {
    stages: Vec<Arc<dyn Middleware<S>>>,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<S> Default for Pipeline<S> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<S: Send + Sync + 'static> Pipeline<S> {
    pub fn new(stages: Vec<Arc<dyn Middleware<S>>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: Arc<dyn Middleware<S>>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Fold `candidate` through every stage in order.
    pub async fn apply(
        &self,
        kind: OperationKind,
        previous: Arc<S>,
        candidate: S,
    ) -> StoreResult<S> {
        let mut next = candidate;
        for stage in &self.stages {
            let op = Operation {
                kind,
                previous: Arc::clone(&previous),
                next,
            };
            trace!(stage = stage.name(), %kind, "running middleware stage");
            next = stage.handle(op).await.map_err(|source| StoreError::Middleware {
                stage: stage.name().to_string(),
                kind,
                source,
            })?;
        }
        Ok(next)
    }
}

/// Middleware built from an async closure. See [`from_fn`].
pub struct FnMiddleware<S, F> {
    name: String,
    f: F,
    _state: PhantomData<fn(S) -> S>,
}

/// Wrap an async closure as a named stage.
///
/// ```ignore
/// let stamp = middleware::from_fn("stamp", |op: Operation<Counter>| async move {
///     Ok(Counter { updated_by: Some(op.kind.to_string()), ..op.next })
/// });
/// ```
pub fn from_fn<S, F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Middleware<S>>
where
    S: Send + Sync + 'static,
    F: Fn(Operation<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
        _state: PhantomData,
    })
}

#[async_trait]
impl<S, F, Fut> Middleware<S> for FnMiddleware<S, F>
where
    S: Send + Sync + 'static,
    F: Fn(Operation<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, op: Operation<S>) -> anyhow::Result<S> {
        (self.f)(op).await
    }
}

/// Middleware built from a synchronous closure. See [`map`].
pub struct MapMiddleware<S, F> {
    name: String,
    f: F,
    _state: PhantomData<fn(S) -> S>,
}

/// Wrap a synchronous closure as a named stage.
pub fn map<S, F>(name: impl Into<String>, f: F) -> Arc<dyn Middleware<S>>
where
    S: Send + Sync + 'static,
    F: Fn(Operation<S>) -> anyhow::Result<S> + Send + Sync + 'static,
{
    Arc::new(MapMiddleware {
        name: name.into(),
        f,
        _state: PhantomData,
    })
}

#[async_trait]
impl<S, F> Middleware<S> for MapMiddleware<S, F>
where
    S: Send + Sync + 'static,
    F: Fn(Operation<S>) -> anyhow::Result<S> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, op: Operation<S>) -> anyhow::Result<S> {
        (self.f)(op)
    }
}

/// Pass-through stage that logs every operation at `debug`.
pub struct TracingMiddleware {
    label: String,
}

impl TracingMiddleware {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl<S: std::fmt::Debug + Send + Sync + 'static> Middleware<S> for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn handle(&self, op: Operation<S>) -> anyhow::Result<S> {
        debug!(
            store = %self.label,
            kind = %op.kind,
            previous = ?op.previous,
            next = ?op.next,
            "operation"
        );
        Ok(op.next)
    }
}
