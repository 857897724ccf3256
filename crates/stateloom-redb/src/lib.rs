//! stateloom-redb: embedded storage adapter for stateloom.
//!
//! Backed by [redb](https://docs.rs/redb), provides on-disk and in-memory
//! persistence for persistent-scope stores.
//!
//! # Architecture
//!
//! State is JSON-serialized into redb's `&[u8]` value column under a
//! per-adapter key, so one database file can hold the state of many stores.
//!
//! The `RedbAdapter` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and runs its transactions on tokio's blocking pool.

pub mod adapter;
pub mod error;
pub mod tables;

pub use adapter::RedbAdapter;
pub use error::{RedbAdapterError, RedbResult};
