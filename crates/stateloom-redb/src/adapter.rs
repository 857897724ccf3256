//! RedbAdapter: persistent-store state kept in an embedded redb database.
//!
//! Each adapter owns one key in the `states` table. Several adapters (and
//! therefore several stores) can share a database by using different keys;
//! see [`RedbAdapter::with_key`]. Values are JSON-serialized. Database work
//! runs on tokio's blocking pool.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stateloom::StorageAdapter;
use tracing::debug;

use crate::error::{RedbAdapterError, RedbResult};
use crate::tables::STATES;

/// Convert any `Display` error into a `RedbAdapterError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RedbAdapterError::$variant(e.to_string())
    };
}

/// Storage adapter backed by redb. `Clone` shares the database handle.
pub struct RedbAdapter<S> {
    db: Arc<Database>,
    key: String,
    _state: PhantomData<fn() -> S>,
}

impl<S> Clone for RedbAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            key: self.key.clone(),
            _state: PhantomData,
        }
    }
}

impl<S> RedbAdapter<S> {
    /// Open (or create) a database file and bind the adapter to `key`.
    pub fn open(path: &Path, key: impl Into<String>) -> RedbResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let adapter = Self::from_database(Arc::new(db), key.into())?;
        debug!(?path, key = %adapter.key, "redb adapter opened");
        Ok(adapter)
    }

    /// Ephemeral in-memory database (for testing).
    pub fn open_in_memory(key: impl Into<String>) -> RedbResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let adapter = Self::from_database(Arc::new(db), key.into())?;
        debug!(key = %adapter.key, "in-memory redb adapter opened");
        Ok(adapter)
    }

    fn from_database(db: Arc<Database>, key: String) -> RedbResult<Self> {
        let adapter = Self {
            db,
            key,
            _state: PhantomData,
        };
        adapter.ensure_tables()?;
        Ok(adapter)
    }

    /// Another adapter over the same database, bound to a different key.
    pub fn with_key<T>(&self, key: impl Into<String>) -> RedbAdapter<T> {
        RedbAdapter {
            db: Arc::clone(&self.db),
            key: key.into(),
            _state: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn ensure_tables(&self) -> RedbResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(STATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Raw bytes stored under this adapter's key.
    pub fn load_bytes(&self) -> RedbResult<Option<Vec<u8>>> {
        load_bytes(&self.db, &self.key)
    }

    /// Remove the stored value. Returns true if it existed.
    pub fn clear(&self) -> RedbResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STATES).map_err(map_err!(Table))?;
            existed = table
                .remove(self.key.as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %self.key, existed, "stored state cleared");
        Ok(existed)
    }

    /// Every key with a stored value in this database.
    pub fn keys(&self) -> RedbResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATES).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }
}

fn load_bytes(db: &Database, key: &str) -> RedbResult<Option<Vec<u8>>> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = txn.open_table(STATES).map_err(map_err!(Table))?;
    let value = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    Ok(value)
}

fn store_bytes(db: &Database, key: &str, value: &[u8]) -> RedbResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    {
        let mut table = txn.open_table(STATES).map_err(map_err!(Table))?;
        table.insert(key, value).map_err(map_err!(Write))?;
    }
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

#[async_trait]
impl<S> StorageAdapter<S> for RedbAdapter<S>
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    async fn read(&self) -> anyhow::Result<Option<S>> {
        let db = Arc::clone(&self.db);
        let key = self.key.clone();
        let bytes = tokio::task::spawn_blocking(move || load_bytes(&db, &key))
            .await
            .map_err(map_err!(Join))??;

        let Some(bytes) = bytes else {
            debug!(key = %self.key, "no stored state");
            return Ok(None);
        };
        let state = serde_json::from_slice(&bytes).map_err(|e| RedbAdapterError::Deserialize {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        debug!(key = %self.key, bytes = bytes.len(), "stored state loaded");
        Ok(Some(state))
    }

    async fn write(&self, state: &S) -> anyhow::Result<()> {
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let len = value.len();
        let db = Arc::clone(&self.db);
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || store_bytes(&db, &key, &value))
            .await
            .map_err(map_err!(Join))??;
        debug!(key = %self.key, bytes = len, "state stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use stateloom::{Store, StoreConfig};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
        total_cents: u64,
    }

    fn empty_cart() -> Cart {
        Cart {
            items: Vec::new(),
            total_cents: 0,
        }
    }

    // ── Adapter contract ───────────────────────────────────────────

    #[tokio::test]
    async fn empty_database_reads_none() {
        let adapter: RedbAdapter<Cart> = RedbAdapter::open_in_memory("cart").unwrap();
        assert!(adapter.read().await.unwrap().is_none());
        assert!(adapter.keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_then_read() {
        let adapter: RedbAdapter<Cart> = RedbAdapter::open_in_memory("cart").unwrap();
        let cart = Cart {
            items: vec!["apple".to_string()],
            total_cents: 120,
        };

        adapter.write(&cart).await.unwrap();
        assert_eq!(adapter.read().await.unwrap(), Some(cart));
        assert_eq!(adapter.keys().unwrap(), vec!["cart".to_string()]);
    }

    #[tokio::test]
    async fn keys_are_isolated_within_one_database() {
        let carts: RedbAdapter<Cart> = RedbAdapter::open_in_memory("cart").unwrap();
        let counters: RedbAdapter<u64> = carts.with_key("visits");

        carts.write(&empty_cart()).await.unwrap();
        counters.write(&7).await.unwrap();

        assert_eq!(counters.read().await.unwrap(), Some(7));
        assert_eq!(carts.read().await.unwrap(), Some(empty_cart()));
        let mut keys = carts.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cart".to_string(), "visits".to_string()]);
    }

    #[tokio::test]
    async fn clear_removes_value() {
        let adapter: RedbAdapter<Cart> = RedbAdapter::open_in_memory("cart").unwrap();
        adapter.write(&empty_cart()).await.unwrap();

        assert!(adapter.clear().unwrap());
        assert!(!adapter.clear().unwrap());
        assert!(adapter.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_value_is_an_error() {
        let adapter: RedbAdapter<Cart> = RedbAdapter::open_in_memory("cart").unwrap();
        let wrong: RedbAdapter<String> = adapter.with_key("cart");
        wrong.write(&"not a cart".to_string()).await.unwrap();

        let err = adapter.read().await.unwrap_err();
        assert!(err.to_string().contains("`cart`"));
        assert!(adapter.load_bytes().unwrap().is_some());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let adapter: RedbAdapter<Cart> = RedbAdapter::open(&db_path, "cart").unwrap();
            adapter
                .write(&Cart {
                    items: vec!["pear".to_string()],
                    total_cents: 80,
                })
                .await
                .unwrap();
        }

        // Reopen the same database file.
        let adapter: RedbAdapter<Cart> = RedbAdapter::open(&db_path, "cart").unwrap();
        let cart = adapter.read().await.unwrap().unwrap();
        assert_eq!(cart.items, vec!["pear".to_string()]);
    }

    // ── Through a store ────────────────────────────────────────────

    #[tokio::test]
    async fn persistent_store_writes_through_and_reseeds() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.redb");

        {
            let adapter: RedbAdapter<Cart> = RedbAdapter::open(&db_path, "cart").unwrap();
            let store: Store<Cart> = Store::new(
                StoreConfig::new(empty_cart())
                    .name("cart")
                    .persistent()
                    .with_adapter(Arc::new(adapter)),
            );
            store
                .update(|c| Cart {
                    items: vec!["tea".to_string()],
                    total_cents: c.total_cents + 350,
                })
                .await
                .unwrap();
        }

        let adapter: RedbAdapter<Cart> = RedbAdapter::open(&db_path, "cart").unwrap();
        let store: Store<Cart> = Store::new(
            StoreConfig::new(empty_cart())
                .persistent()
                .with_adapter(Arc::new(adapter)),
        );
        assert!(store.is_initialized().await.unwrap());
        assert_eq!(store.read().await.unwrap().total_cents, 350);
    }
}
