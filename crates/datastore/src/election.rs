//! Active/standby election over ordered, TTL-bound instance keys.
//!
//! Every replica inserts its [`InstanceInfo`] under `<cluster>/instances/`
//! with an ordered key bound to a lease. The replica owning the smallest live
//! key is the master. Keys disappear when their lease is not refreshed within
//! [`TTL_MASTER`], handing mastership to the next oldest replica.

use crate::error::ElectionError;
use crate::instances::{InstanceInfo, read_instances};
use kv_client::{Consistency, KvStore, LeaseId, LeaseState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lifetime of an instance key without heartbeats.
pub const TTL_MASTER: Duration = Duration::from_secs(30);
/// Poll cadence while master.
pub const TTL_ACTIVE: Duration = Duration::from_secs(10);
/// Poll cadence while standby.
pub const TTL_STANDBY: Duration = Duration::from_secs(15);
/// Deadline for every election call against the store.
pub const ELECTION_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Registration {
    key: String,
    lease: LeaseId,
}

/// One replica's view of the election.
pub struct Election {
    store: Arc<dyn KvStore>,
    dir: String,
    info: InstanceInfo,
    ttl: Duration,
    registration: Mutex<Option<Registration>>,
}

impl std::fmt::Debug for Election {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Election")
            .field("dir", &self.dir)
            .field("ip", &self.info.ip)
            .finish_non_exhaustive()
    }
}

async fn with_deadline<T, F>(future: F) -> Result<T, ElectionError>
where
    F: Future<Output = Result<T, ElectionError>>,
{
    tokio::time::timeout(ELECTION_DEADLINE, future)
        .await
        .map_err(|_| ElectionError::Store(kv_client::StoreError::Timeout(ELECTION_DEADLINE)))?
}

impl Election {
    pub fn new(store: Arc<dyn KvStore>, instances_dir: impl Into<String>, info: InstanceInfo) -> Self {
        Self::with_ttl(store, instances_dir, info, TTL_MASTER)
    }

    pub fn with_ttl(
        store: Arc<dyn KvStore>,
        instances_dir: impl Into<String>,
        info: InstanceInfo,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            dir: instances_dir.into().trim_end_matches('/').to_string(),
            info,
            ttl,
            registration: Mutex::new(None),
        }
    }

    /// This replica's record.
    pub fn info(&self) -> &InstanceInfo {
        &self.info
    }

    /// Current election key, if registered.
    pub async fn key(&self) -> Option<String> {
        self.registration.lock().await.as_ref().map(|r| r.key.clone())
    }

    /// Insert this instance's ordered key. Does nothing when already registered.
    pub async fn register_self(&self) -> Result<String, ElectionError> {
        let mut registration = self.registration.lock().await;
        if let Some(existing) = registration.as_ref() {
            return Ok(existing.key.clone());
        }

        let value = serde_json::to_string(&self.info)?;
        let (key, lease) = with_deadline(async {
            let lease = self.store.grant_lease(self.ttl).await?;
            let key = self.store.create_in_order(&self.dir, &value, lease).await?;
            Ok((key, lease))
        })
        .await?;

        info!("Registered instance {} as {}", self.info.ip, key);
        *registration = Some(Registration { key: key.clone(), lease });
        Ok(key)
    }

    /// Refresh the instance key's TTL.
    ///
    /// Fails with `NotRegistered` when the key is gone; the registration is
    /// then forgotten so the next tick registers afresh.
    pub async fn heartbeat(&self) -> Result<(), ElectionError> {
        let mut registration = self.registration.lock().await;
        let Some(current) = registration.clone() else {
            return Err(ElectionError::NotRegistered);
        };

        let alive = with_deadline(async {
            if self.store.keep_alive(current.lease).await? == LeaseState::Expired {
                return Ok(false);
            }
            Ok(self.store.get(&current.key, Consistency::Linearizable).await?.is_some())
        })
        .await;

        match alive {
            Ok(true) => {
                debug!("Heartbeat refreshed {}", current.key);
                Ok(())
            }
            Ok(false) => {
                warn!("Instance key {} expired", current.key);
                *registration = None;
                Err(ElectionError::NotRegistered)
            }
            Err(e) => {
                *registration = None;
                Err(e)
            }
        }
    }

    /// Whether this instance owns the smallest live key.
    ///
    /// Any store failure answers `false`.
    pub async fn is_master(&self) -> bool {
        let Some(own) = self.key().await else {
            return false;
        };
        let prefix = format!("{}/", self.dir);
        let first = with_deadline(async {
            Ok(self
                .store
                .list(&prefix, Consistency::Linearizable)
                .await?
                .into_iter()
                .next()
                .map(|kv| kv.key))
        })
        .await;

        match first {
            Ok(first) => first.as_deref() == Some(own.as_str()),
            Err(e) => {
                warn!("Mastership check failed: {}", e);
                false
            }
        }
    }

    /// One election tick: register or heartbeat, then report mastership.
    pub async fn while_master(&self) -> bool {
        let result = if self.key().await.is_none() {
            self.register_self().await.map(|_| ())
        } else {
            self.heartbeat().await
        };
        if let Err(e) = result {
            warn!("Election tick failed: {}", e);
            return false;
        }
        self.is_master().await
    }

    /// Remove the instance key, surrendering mastership.
    pub async fn shutdown(&self) -> Result<(), ElectionError> {
        let Some(current) = self.registration.lock().await.take() else {
            return Ok(());
        };
        with_deadline(async {
            self.store.delete(&current.key).await?;
            self.store.revoke_lease(current.lease).await?;
            Ok(())
        })
        .await?;
        info!("Removed instance key {}", current.key);
        Ok(())
    }

    /// Every live instance in election order.
    pub async fn instances(&self) -> Result<Vec<InstanceInfo>, ElectionError> {
        with_deadline(read_instances(self.store.as_ref(), &self.dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_client::MemoryStore;
    use std::net::Ipv4Addr;

    fn info(last: u8) -> InstanceInfo {
        InstanceInfo {
            ip: Ipv4Addr::new(10, 0, 0, last),
            nic: format!("aa:bb:cc:dd:ee:{:02x}", last),
            web_port: 8000,
            version: "test".to_string(),
            commit: String::new(),
            build_time: String::new(),
            debug_mode: false,
            service_start_time: 0,
        }
    }

    fn election(store: &MemoryStore, last: u8) -> Election {
        Election::new(Arc::new(store.clone()), "c/instances", info(last))
    }

    #[tokio::test]
    async fn test_first_registered_is_master() {
        let store = MemoryStore::new();
        let a = election(&store.connect(), 1);
        let b = election(&store.connect(), 2);

        assert!(a.while_master().await);
        assert!(!b.while_master().await);
        assert!(a.while_master().await);
        assert_eq!(a.instances().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let store = MemoryStore::new();
        let a = election(&store, 1);
        let first = a.register_self().await.unwrap();
        let second = a.register_self().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.dump().keys().filter(|k| k.starts_with("c/instances/")).count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_requires_registration() {
        let store = MemoryStore::new();
        let a = election(&store, 1);
        assert!(matches!(a.heartbeat().await, Err(ElectionError::NotRegistered)));

        a.register_self().await.unwrap();
        a.heartbeat().await.unwrap();

        store.advance(TTL_MASTER * 2);
        assert!(matches!(a.heartbeat().await, Err(ElectionError::NotRegistered)));
        assert!(a.key().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_master() {
        let store = MemoryStore::new();
        let handle = store.connect();
        let a = election(&handle, 1);
        assert!(a.while_master().await);

        handle.set_partitioned(true);
        assert!(!a.is_master().await);
        assert!(!a.while_master().await);
    }

    #[tokio::test]
    async fn test_shutdown_hands_over() {
        let store = MemoryStore::new();
        let a = election(&store.connect(), 1);
        let b = election(&store.connect(), 2);
        assert!(a.while_master().await);
        assert!(!b.while_master().await);

        a.shutdown().await.unwrap();
        assert!(b.while_master().await);
    }

    #[tokio::test]
    async fn test_three_replicas_failover() {
        let store = MemoryStore::new();
        let handles: Vec<MemoryStore> = (1..=3).map(|_| store.connect()).collect();
        let replicas: Vec<Election> = handles
            .iter()
            .zip(1u8..)
            .map(|(h, last)| election(h, last))
            .collect();

        let masters = tick_all(&replicas).await;
        assert_eq!(masters.iter().filter(|m| **m).count(), 1);
        let old_master = masters.iter().position(|m| *m).unwrap();

        // the master loses the network for two TTLs while the others keep ticking
        handles[old_master].set_partitioned(true);
        let mut current = Vec::new();
        for _ in 0..6 {
            store.advance(TTL_ACTIVE);
            current = tick_all(&replicas).await;
        }
        assert_eq!(current.iter().filter(|m| **m).count(), 1);
        assert!(!current[old_master]);
    }

    async fn tick_all(replicas: &[Election]) -> Vec<bool> {
        let (a, b, c) = tokio::join!(
            replicas[0].while_master(),
            replicas[1].while_master(),
            replicas[2].while_master()
        );
        assert!(u8::from(a) + u8::from(b) + u8::from(c) <= 1);
        let (a, b, c) = tokio::join!(
            replicas[0].is_master(),
            replicas[1].is_master(),
            replicas[2].is_master()
        );
        vec![a, b, c]
    }
}
