//! In-process `DataStore` backed by a concurrent map.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::store::{DataStore, StoreError};

/// A thread-safe in-memory store.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Check for a key without going through the async interface.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidRequest("empty key".to_string()));
        }
        self.inner.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.remove(key).is_some())
    }
}
