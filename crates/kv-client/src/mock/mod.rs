//! In-memory coordination store for unit testing
//!
//! `MemoryStore` implements [`KvStore`] with the same revision, lease and
//! ordering semantics as etcd, so election, lease-pool and datastore tests run
//! without a server. Handles created with [`MemoryStore::connect`] share the
//! data but can be partitioned individually, and the lease clock can be moved
//! forward with [`MemoryStore::advance`].

use crate::error::StoreError;
use crate::kv_trait::KvStore;
use crate::models::{Consistency, KeyValue, LeaseId, LeaseState};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    create_revision: i64,
    mod_revision: i64,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct LeaseRecord {
    ttl: Duration,
    deadline: Instant,
}

#[derive(Debug)]
struct State {
    revision: i64,
    next_lease: i64,
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, LeaseRecord>,
    clock_offset: Duration,
}

impl State {
    fn now(&self) -> Instant {
        Instant::now() + self.clock_offset
    }

    /// Drop expired leases together with their keys.
    fn expire(&mut self) {
        let now = self.now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, record)| record.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) {
        self.leases.remove(&id);
        self.entries.retain(|_, entry| entry.lease != Some(id));
    }

    fn write(&mut self, key: &str, value: &str, lease: Option<LeaseId>) -> i64 {
        self.revision += 1;
        let revision = self.revision;
        let create_revision = self
            .entries
            .get(key)
            .map_or(revision, |existing| existing.create_revision);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                create_revision,
                mod_revision: revision,
                lease,
            },
        );
        revision
    }
}

/// In-memory store for testing
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    partitioned: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                revision: 0,
                next_lease: 1,
                entries: BTreeMap::new(),
                leases: HashMap::new(),
                clock_offset: Duration::ZERO,
            })),
            partitioned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another client handle on the same data with its own partition switch
    pub fn connect(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            partitioned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every call through this handle fail with `Unavailable`
    pub fn set_partitioned(&self, partitioned: bool) {
        self.partitioned.store(partitioned, Ordering::SeqCst);
    }

    /// Move the lease clock forward
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.clock_offset += by;
        state.expire();
    }

    /// Seed a key directly (for test setup)
    pub fn insert(&self, key: &str, value: &str) {
        self.lock().write(key, value, None);
    }

    /// Snapshot of every live key and value (for assertions)
    pub fn dump(&self) -> BTreeMap<String, String> {
        let mut state = self.lock();
        state.expire();
        state
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock after checking reachability and purging expired leases
    fn reach(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.partitioned.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("partitioned".to_string()));
        }
        let mut state = self.lock();
        state.expire();
        Ok(state)
    }

    fn to_key_value(key: &str, entry: &Entry) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            create_revision: entry.create_revision,
            mod_revision: entry.mod_revision,
            lease: entry.lease,
        }
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    fn endpoints(&self) -> Vec<String> {
        vec!["memory://".to_string()]
    }

    async fn get(&self, key: &str, _consistency: Consistency) -> Result<Option<KeyValue>, StoreError> {
        let state = self.reach()?;
        Ok(state.entries.get(key).map(|e| Self::to_key_value(key, e)))
    }

    async fn list(&self, prefix: &str, _consistency: Consistency) -> Result<Vec<KeyValue>, StoreError> {
        let state = self.reach()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| Self::to_key_value(k, e))
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        Ok(self.reach()?.write(key, value, None))
    }

    async fn put_with_lease(&self, key: &str, value: &str, lease: LeaseId) -> Result<i64, StoreError> {
        let mut state = self.reach()?;
        if !state.leases.contains_key(&lease) {
            return Err(StoreError::Api(format!("lease {} not found", lease)));
        }
        Ok(state.write(key, value, Some(lease)))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_mod_revision: Option<i64>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.reach()?;
        let current = state.entries.get(key).map(|e| e.mod_revision);
        if current != expected_mod_revision {
            return Ok(false);
        }
        state.write(key, value, None);
        Ok(true)
    }

    async fn create_in_order(&self, dir: &str, value: &str, lease: LeaseId) -> Result<String, StoreError> {
        let mut state = self.reach()?;
        if !state.leases.contains_key(&lease) {
            return Err(StoreError::Api(format!("lease {} not found", lease)));
        }
        let key = format!("{}/{:020}", dir.trim_end_matches('/'), state.revision + 1);
        state.write(&key, value, Some(lease));
        Ok(key)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.reach()?;
        let existed = state.entries.remove(key).is_some();
        if existed {
            state.revision += 1;
        }
        Ok(existed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut state = self.reach()?;
        let before = state.entries.len();
        state.entries.retain(|k, _| !k.starts_with(prefix));
        let deleted = before - state.entries.len();
        if deleted > 0 {
            state.revision += 1;
        }
        Ok(deleted as u64)
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut state = self.reach()?;
        let id = LeaseId(state.next_lease);
        state.next_lease += 1;
        let deadline = state.now() + ttl;
        state.leases.insert(id, LeaseRecord { ttl, deadline });
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<LeaseState, StoreError> {
        let mut state = self.reach()?;
        let now = state.now();
        Ok(match state.leases.get_mut(&lease) {
            Some(record) => {
                record.deadline = now + record.ttl;
                LeaseState::Alive(record.ttl)
            }
            None => LeaseState::Expired,
        })
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.reach()?.drop_lease(lease);
        Ok(())
    }
}
