//! Storage adapters: external persistence for persistent-scope stores.
//!
//! The engine only ever calls [`StorageAdapter::read`] once, to seed the
//! persistent record, and [`StorageAdapter::write`] after every commit.
//! Request-scoped stores never touch their adapter.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Read/write capability against an external medium.
#[async_trait]
pub trait StorageAdapter<S>: Send + Sync {
    /// Load the stored state, or `None` if nothing has been stored yet.
    async fn read(&self) -> anyhow::Result<Option<S>>;

    /// Persist `state`, replacing whatever was stored before.
    async fn write(&self, state: &S) -> anyhow::Result<()>;
}

/// In-process adapter holding the last written value.
///
/// Counts reads and writes and can delay reads, which makes it useful for
/// observing the engine's call pattern as well as for caching state across
/// stores that share one adapter.
pub struct MemoryAdapter<S> {
    value: Mutex<Option<S>>,
    read_delay: Option<Duration>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<S: Clone + Send + Sync> MemoryAdapter<S> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            read_delay: None,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Start with a stored value.
    pub fn with_value(value: S) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            ..Self::new()
        }
    }

    /// Sleep for `delay` on every read before answering.
    pub fn with_read_delay(self, delay: Duration) -> Self {
        Self {
            read_delay: Some(delay),
            ..self
        }
    }

    pub fn stored(&self) -> Option<S> {
        self.value.lock().expect("memory adapter lock").clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl<S: Clone + Send + Sync> Default for MemoryAdapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: Clone + Send + Sync> StorageAdapter<S> for MemoryAdapter<S> {
    async fn read(&self) -> anyhow::Result<Option<S>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.stored())
    }

    async fn write(&self, state: &S) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().expect("memory adapter lock") = Some(state.clone());
        Ok(())
    }
}

/// Stores the state as a JSON document on disk.
///
/// A missing file reads as "nothing stored". Writes go to a sibling temp
/// file that is then renamed over the target.
pub struct JsonFileAdapter<S> {
    path: PathBuf,
    _state: PhantomData<fn() -> S>,
}

impl<S> JsonFileAdapter<S> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _state: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl<S> StorageAdapter<S> for JsonFileAdapter<S>
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    async fn read(&self) -> anyhow::Result<Option<S>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored state file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "state file loaded");
        Ok(Some(state))
    }

    async fn write(&self, state: &S) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "state file written");
        Ok(())
    }
}
