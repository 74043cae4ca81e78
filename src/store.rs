//! Persistence boundary. The registry speaks to an abstract document store;
//! whether documents land in memory or on disk is an implementation detail
//! behind the [`Store`] trait.

use crate::errors::DustboxError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Collection names used by the registry.
pub mod collections {
    pub const USERS: &str = "users";
    pub const DEVICES: &str = "devices";
    pub const CLIENTS: &str = "clients";
    pub const TOKENS: &str = "tokens";
}

/// Keyed document store. Serialized entity forms are exactly the documents
/// passed to `put`. Failures of the backing medium surface as
/// [`DustboxError::Storage`], distinct from the domain taxonomy.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, collection: &str, key: &str, doc: Value) -> Result<(), DustboxError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DustboxError>;

    async fn delete(&self, collection: &str, key: &str) -> Result<(), DustboxError>;

    /// All documents in a collection, in stable key order. Used to hydrate
    /// the registry at startup.
    async fn list(&self, collection: &str) -> Result<Vec<Value>, DustboxError>;
}

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Volatile store backing tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, collection: &str, key: &str, doc: Value) -> Result<(), DustboxError> {
        let mut inner = self.inner.write().await;
        inner
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DustboxError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), DustboxError> {
        let mut inner = self.inner.write().await;
        if let Some(docs) = inner.get_mut(collection) {
            docs.remove(key);
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, DustboxError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Single-file JSON store, written through on every mutation. Matches the
/// original deployment shape: one small database file next to the binary.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: RwLock<Collections>,
}

impl JsonFileStore {
    /// Open or create the database file. An existing file must hold a JSON
    /// object of collections; anything else is a [`DustboxError::DataFormat`].
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DustboxError> {
        let path = path.into();
        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DustboxError::DataFormat(format!("bad database file: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::default(),
            Err(e) => {
                return Err(DustboxError::Storage(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(Self {
            path,
            inner: RwLock::new(inner),
        })
    }

    async fn persist(&self, inner: &Collections) -> Result<(), DustboxError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DustboxError::Storage(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        let bytes = serde_json::to_vec_pretty(inner)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| DustboxError::Storage(format!("cannot write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn put(&self, collection: &str, key: &str, doc: Value) -> Result<(), DustboxError> {
        let mut inner = self.inner.write().await;
        inner
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        self.persist(&inner).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DustboxError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), DustboxError> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .get_mut(collection)
            .and_then(|docs| docs.remove(key))
            .is_some();
        if removed {
            self.persist(&inner).await?;
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, DustboxError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}
