//! Error types for the stateloom store engine.

use thiserror::Error;

use crate::middleware::OperationKind;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to callers of store operations.
///
/// Derive failures never appear here; they are reported through the
/// `on_error` hook and the store keeps serving the base state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store `{store}` uses request scope but no logical request is active")]
    NoRequestScope { store: String },

    #[error("initial state factory failed: {0}")]
    Factory(#[source] anyhow::Error),

    #[error("reducer failed: {0}")]
    Reducer(#[source] anyhow::Error),

    #[error("middleware `{stage}` failed during {kind}: {source}")]
    Middleware {
        stage: String,
        kind: OperationKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage adapter {op} failed: {source}")]
    Adapter {
        op: AdapterOp,
        #[source]
        source: anyhow::Error,
    },

    #[error("{hook} callback failed: {source}")]
    Callback {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("batch aborted: {0}")]
    Batch(#[source] anyhow::Error),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// Which half of the storage adapter contract failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterOp {
    Read,
    Write,
}

impl std::fmt::Display for AdapterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterOp::Read => f.write_str("read"),
            AdapterOp::Write => f.write_str("write"),
        }
    }
}

/// A contained failure reported to the `on_error` hook.
///
/// Whatever the failing function produced (an error value or a panic
/// payload) is flattened into `message`, so the hook always sees the same
/// shape.
#[derive(Debug, Clone)]
pub struct StoreFailure<S> {
    /// The engine step that failed (currently always `"derive"`).
    pub method: &'static str,
    /// Base state the step was running against.
    pub state: std::sync::Arc<S>,
    /// Human-readable description of the failure.
    pub message: String,
}

impl<S> StoreFailure<S> {
    pub(crate) fn derive(state: std::sync::Arc<S>, message: String) -> Self {
        Self {
            method: "derive",
            state,
            message,
        }
    }
}

/// Turn a panic payload into a message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
