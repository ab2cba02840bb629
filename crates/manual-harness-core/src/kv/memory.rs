//! In-memory [`KvStore`] for tests and ephemeral deployments.
//!
//! A single `BTreeMap` behind `std::sync::RwLock`. Keeping the map ordered
//! makes [`scan_prefix`](KvStore::scan_prefix) a range query. No lock is
//! held across an `.await`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{parse_counter, KvStore};
use crate::error::{RagError, Result};

#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> RagError {
    RagError::Storage("in-memory kv lock poisoned".to_string())
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.map.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.map.write().map_err(|_| poisoned())?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.write().map_err(|_| poisoned())?;
        Ok(map.remove(key).is_some())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut map = self.map.write().map_err(|_| poisoned())?;
        let current = parse_counter(key, map.get(key).map(String::as_str))?;
        let next = current + delta;
        map.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let map = self.map.read().map_err(|_| poisoned())?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
