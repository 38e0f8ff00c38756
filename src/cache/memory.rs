use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheTier;
use crate::error::StorageError;

/// In-process cache tier. Unbounded, no eviction.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.value().clone())
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, String>, StorageError> {
        Ok(keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.clone(), v.value().clone())))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
