//! Key-value persistence strategy.
//!
//! The [`KvStore`] trait is the single persistence interface used for
//! document records, pending ingestions, plan assignments and usage
//! counters. Adapters are swappable: [`memory::MemoryKv`] lives here, the
//! SQLite adapter lives in the application crate.
//!
//! Values are strings (JSON for records, decimal for counters). Every key
//! written by the core is tenant-scoped; see the helpers below for the
//! layout.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::TenantId;

/// Abstract key-value backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](KvStore::get) | Read one value |
/// | [`set`](KvStore::set) | Insert or overwrite one value |
/// | [`delete`](KvStore::delete) | Remove one key |
/// | [`incr`](KvStore::incr) | Atomically add to an integer value |
/// | [`scan_prefix`](KvStore::scan_prefix) | All pairs under a prefix, sorted by key |
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add `delta` to the integer stored at `key` (missing keys count as 0)
    /// and return the new value. Concurrent calls never lose updates.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

pub fn doc_key(tenant: &TenantId, doc_id: &str) -> String {
    format!("doc/{}/{}", tenant, doc_id)
}

pub fn doc_prefix(tenant: &TenantId) -> String {
    format!("doc/{}/", tenant)
}

pub fn pending_key(tenant: &TenantId, doc_id: &str) -> String {
    format!("pending/{}/{}", tenant, doc_id)
}

pub fn pending_prefix(tenant: &TenantId) -> String {
    format!("pending/{}/", tenant)
}

pub fn usage_key(tenant: &TenantId, month: &str, counter: &str) -> String {
    format!("usage/{}/{}/{}", tenant, month, counter)
}

pub fn plan_key(tenant: &TenantId) -> String {
    format!("plan/{}", tenant)
}

/// Parse a stored counter value. Missing values read as 0.
pub fn parse_counter(key: &str, value: Option<&str>) -> Result<i64> {
    match value {
        None => Ok(0),
        Some(v) => v.trim().parse::<i64>().map_err(|_| {
            crate::error::RagError::Storage(format!("value at '{}' is not an integer: {}", key, v))
        }),
    }
}
