//! stateloom: scoped state container with derived views, middleware and
//! write-through persistence.
//!
//! # Architecture
//!
//! A [`Store`] resolves an instance record for every operation:
//!
//! - [`ScopeMode::Request`] stores keep one record per logical request,
//!   held in the [`RequestContext`] the host enters with
//!   [`RequestContext::scope`].
//! - [`ScopeMode::Persistent`] stores keep one record for their whole
//!   lifetime, seeded lazily (optionally from a [`StorageAdapter`]) with
//!   concurrent first accesses sharing one seed.
//!
//! Mutations (`initialize`, `update`, `set`, `patch`, `reset`, `batch`) run
//! their candidate state through the middleware [`Pipeline`], commit it,
//! write it to the adapter (persistent scope only) and fire the matching
//! lifecycle hook. Reads combine the base state with a derived view that is
//! memoized until the next commit.
//!
//! Diagnostics go through `tracing`; set `debug` in [`StoreOptions`] to get
//! commit and warning events at `info`/`warn`.

pub mod adapter;
pub mod batch;
pub mod config;
mod derive;
pub mod error;
pub mod middleware;
pub mod patch;
pub mod record;
pub mod scope;
pub mod store;

pub use adapter::{JsonFileAdapter, MemoryAdapter, StorageAdapter};
pub use batch::Batch;
pub use config::{InitialState, ScopeMode, StoreConfig, StoreOptions};
pub use error::{AdapterOp, StoreError, StoreFailure, StoreResult};
pub use middleware::{Middleware, Operation, OperationKind, Pipeline, TracingMiddleware};
pub use patch::Patch;
pub use record::Snapshot;
pub use scope::{RequestContext, RequestScope, StoreId, TaskLocalScope};
pub use store::Store;
