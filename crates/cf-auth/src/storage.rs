//! Key-value storage for configuration and roles.
//!
//! The broker owns persistence; this module only defines the contract the
//! core reads through, plus an in-memory implementation for development and
//! tests.

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// A flat key-value store.
///
/// Implementations must be safe to share between concurrent logins.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists the keys beginning with `prefix`, with the prefix stripped.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory [`Storage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("a").await.unwrap(), None);

        storage.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(b"1".to_vec()));

        storage.delete("a").await.unwrap();
        storage.delete("a").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let storage = MemoryStorage::new();
        storage.put("role/web", vec![]).await.unwrap();
        storage.put("role/api", vec![]).await.unwrap();
        storage.put("config", vec![]).await.unwrap();
        storage.put("roles", vec![]).await.unwrap();

        let keys = storage.list("role/").await.unwrap();
        assert_eq!(keys, vec!["api".to_string(), "web".to_string()]);
    }
}
