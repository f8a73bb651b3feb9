//! KvStore trait for mocking
//!
//! This trait abstracts the coordination store so the control plane can run
//! against etcd in production and against `MemoryStore` in unit tests.

use crate::error::StoreError;
use crate::models::{Consistency, KeyValue, LeaseId, LeaseState};
use std::time::Duration;

/// Trait for coordination store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Endpoints this client talks to
    fn endpoints(&self) -> Vec<String>;

    /// Read a single key
    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<KeyValue>, StoreError>;

    /// Read every key starting with `prefix`, sorted by key
    async fn list(&self, prefix: &str, consistency: Consistency) -> Result<Vec<KeyValue>, StoreError>;

    /// Unconditional write, returns the store revision of the write
    async fn put(&self, key: &str, value: &str) -> Result<i64, StoreError>;

    /// Write bound to a lease; the key vanishes with the lease
    async fn put_with_lease(&self, key: &str, value: &str, lease: LeaseId) -> Result<i64, StoreError>;

    /// Write only if the key's mod revision matches `expected_mod_revision`.
    ///
    /// `None` means the key must not exist. Returns `false` on conflict.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_mod_revision: Option<i64>,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// Insert `value` under `dir` with a key that sorts after every key
    /// previously created this way. Returns the full key.
    async fn create_in_order(&self, dir: &str, value: &str, lease: LeaseId) -> Result<String, StoreError>;

    /// Delete a single key, returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete every key starting with `prefix`, returns the number deleted
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Create a lease with the given time-to-live
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Refresh a lease
    async fn keep_alive(&self, lease: LeaseId) -> Result<LeaseState, StoreError>;

    /// Revoke a lease and delete its keys
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError>;
}
