//! DHCP lease pool.
//!
//! Leases live under `<cluster>/leases/<ip>` as JSON. Allocation reads the
//! whole directory with a quorum read, decides, and writes the chosen lease
//! with a revision-guarded compare-and-swap. One mutex serializes allocation
//! inside a replica; the compare-and-swap protects against other replicas,
//! and a lost race restarts the decision up to [`MAX_ATTEMPTS`] times.

use crate::backoff::FibonacciBackoff;
use crate::error::LeaseError;
use chrono::{DateTime, Utc};
use kv_client::{Consistency, KvStore};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Attempts before a contended allocation gives up with `PoolExhausted`.
pub const MAX_ATTEMPTS: u32 = 8;

/// Owner recorded for an address a client declined.
pub const DECLINED_OWNER: &str = "declined";

/// Shortest lease handed out.
pub const LEASE_MIN: Duration = Duration::from_secs(24 * 3600);
/// Upper bound (exclusive) of the lease length.
pub const LEASE_MAX: Duration = Duration::from_secs(48 * 3600);

/// A lease length drawn uniformly from `[LEASE_MIN, LEASE_MAX)`.
#[must_use]
pub fn random_lease_duration() -> Duration {
    let secs = rand::thread_rng().gen_range(LEASE_MIN.as_secs()..LEASE_MAX.as_secs());
    Duration::from_secs(secs)
}

/// One address binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Owner hardware address, normalized
    pub nic: String,
    pub ip: Ipv4Addr,
    pub first_assigned: DateTime<Utc>,
    pub last_assigned: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

impl Lease {
    fn new(nic: &str, ip: Ipv4Addr, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            nic: nic.to_string(),
            ip,
            first_assigned: now,
            last_assigned: now,
            expire_time: expiry(now, duration),
        }
    }

    /// Same binding, renewed from `now`.
    fn renewed(&self, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            last_assigned: now,
            expire_time: expiry(now, duration),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time < now
    }
}

fn expiry(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// A lease as read, with the revision guarding its next write.
#[derive(Debug, Clone)]
struct Stored {
    lease: Lease,
    mod_revision: i64,
    corrupt: bool,
}

/// The planned write: new content and the expected revision.
#[derive(Debug)]
struct Plan {
    lease: Lease,
    expected: Option<i64>,
}

/// Pool of addresses `[start, start + range)`.
pub struct LeasePool {
    store: Arc<dyn KvStore>,
    dir: String,
    start: Ipv4Addr,
    range: u32,
    lock: Mutex<()>,
}

impl std::fmt::Debug for LeasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasePool")
            .field("dir", &self.dir)
            .field("start", &self.start)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl LeasePool {
    pub fn new(store: Arc<dyn KvStore>, dir: impl Into<String>, start: Ipv4Addr, range: u32) -> Self {
        Self {
            store,
            dir: dir.into().trim_end_matches('/').to_string(),
            start,
            range,
            lock: Mutex::new(()),
        }
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn range(&self) -> u32 {
        self.range
    }

    /// Whether `ip` lies in the configured half-open interval.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let offset = u32::from(ip).wrapping_sub(u32::from(self.start));
        u32::from(ip) >= u32::from(self.start) && offset < self.range
    }

    fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let first = u32::from(self.start);
        (0..self.range).filter_map(move |i| first.checked_add(i)).map(Ipv4Addr::from)
    }

    fn key(&self, ip: Ipv4Addr) -> String {
        format!("{}/{}", self.dir, ip)
    }

    /// Every lease keyed by address.
    ///
    /// An undecodable record is logged and kept as an ownerless, expired
    /// placeholder so its address is only reused by overwriting it.
    async fn load(&self) -> Result<BTreeMap<Ipv4Addr, Stored>, LeaseError> {
        let prefix = format!("{}/", self.dir);
        let entries = self.store.list(&prefix, Consistency::Linearizable).await?;
        let mut leases = BTreeMap::new();
        for kv in entries {
            match serde_json::from_str::<Lease>(&kv.value) {
                Ok(lease) => {
                    leases.insert(
                        lease.ip,
                        Stored {
                            lease,
                            mod_revision: kv.mod_revision,
                            corrupt: false,
                        },
                    );
                }
                Err(e) => {
                    warn!("Skipping invalid lease {}: {}", kv.key, e);
                    let Some(ip) = kv.key.strip_prefix(&prefix).and_then(|s| s.parse::<Ipv4Addr>().ok()) else {
                        continue;
                    };
                    let epoch = DateTime::<Utc>::UNIX_EPOCH;
                    leases.insert(
                        ip,
                        Stored {
                            lease: Lease {
                                nic: String::new(),
                                ip,
                                first_assigned: epoch,
                                last_assigned: epoch,
                                expire_time: epoch,
                            },
                            mod_revision: kv.mod_revision,
                            corrupt: true,
                        },
                    );
                }
            }
        }
        Ok(leases)
    }

    /// Every valid lease on record, in address order.
    pub async fn leases(&self) -> Result<Vec<Lease>, LeaseError> {
        Ok(self
            .load()
            .await?
            .into_values()
            .filter(|s| !s.corrupt)
            .map(|s| s.lease)
            .collect())
    }

    /// The lease currently held by `nic`, live or not.
    pub async fn lease_of(&self, nic: &str) -> Result<Option<Lease>, LeaseError> {
        Ok(self
            .load()
            .await?
            .into_values()
            .map(|s| s.lease)
            .find(|l| l.nic == nic && self.contains(l.ip)))
    }

    /// Choose an address for a DISCOVER from `nic`.
    pub async fn assign(&self, nic: &str, duration: Duration) -> Result<Lease, LeaseError> {
        let lease = self
            .allocate(|leases, now| self.plan_assign(leases, nic, now, duration))
            .await?;
        info!("Assigned {} to {}", lease.ip, nic);
        Ok(lease)
    }

    fn plan_assign(
        &self,
        leases: &BTreeMap<Ipv4Addr, Stored>,
        nic: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Plan, LeaseError> {
        // the client's own binding
        if let Some(own) = leases.values().find(|s| s.lease.nic == nic && self.contains(s.lease.ip)) {
            return Ok(Plan {
                lease: own.lease.renewed(now, duration),
                expected: Some(own.mod_revision),
            });
        }
        // never-used address
        if let Some(ip) = self.addresses().find(|ip| !leases.contains_key(ip)) {
            return Ok(Plan {
                lease: Lease::new(nic, ip, now, duration),
                expected: None,
            });
        }
        // reclaim the first expired one
        if let Some(stale) = leases
            .values()
            .find(|s| self.contains(s.lease.ip) && s.lease.is_expired(now))
        {
            return Ok(Plan {
                lease: Lease::new(nic, stale.lease.ip, now, duration),
                expected: Some(stale.mod_revision),
            });
        }
        Err(LeaseError::PoolExhausted)
    }

    /// Grant or refuse a REQUEST for `ip` from `nic`.
    pub async fn request(&self, nic: &str, ip: Ipv4Addr, duration: Duration) -> Result<Lease, LeaseError> {
        if !self.contains(ip) {
            return Err(LeaseError::NoMatch { nic: nic.to_string(), ip });
        }
        let lease = self
            .allocate(|leases, now| plan_request(leases, nic, ip, now, duration))
            .await?;
        debug!("Confirmed {} for {}", lease.ip, nic);
        Ok(lease)
    }

    /// Expire `nic`'s lease on `ip` right away. Returns whether one was released.
    pub async fn release(&self, nic: &str, ip: Ipv4Addr) -> Result<bool, LeaseError> {
        let result = self
            .allocate(|leases, now| match leases.get(&ip) {
                Some(stored) if stored.lease.nic == nic => Ok(Plan {
                    lease: Lease {
                        expire_time: now,
                        ..stored.lease.clone()
                    },
                    expected: Some(stored.mod_revision),
                }),
                _ => Err(LeaseError::NoMatch { nic: nic.to_string(), ip }),
            })
            .await;
        match result {
            Ok(_) => {
                info!("Released {} from {}", ip, nic);
                Ok(true)
            }
            Err(LeaseError::NoMatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Park `ip` under the declined owner until its current expiry.
    pub async fn decline(&self, nic: &str, ip: Ipv4Addr) -> Result<bool, LeaseError> {
        let result = self
            .allocate(|leases, _now| match leases.get(&ip) {
                Some(stored) if stored.lease.nic == nic => Ok(Plan {
                    lease: Lease {
                        nic: DECLINED_OWNER.to_string(),
                        ..stored.lease.clone()
                    },
                    expected: Some(stored.mod_revision),
                }),
                _ => Err(LeaseError::NoMatch { nic: nic.to_string(), ip }),
            })
            .await;
        match result {
            Ok(_) => {
                warn!("{} declined {}", nic, ip);
                Ok(true)
            }
            Err(LeaseError::NoMatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read, plan, compare-and-swap; retry on conflicts.
    async fn allocate<F>(&self, plan: F) -> Result<Lease, LeaseError>
    where
        F: Fn(&BTreeMap<Ipv4Addr, Stored>, DateTime<Utc>) -> Result<Plan, LeaseError>,
    {
        let _guard = self.lock.lock().await;
        let mut backoff = FibonacciBackoff::new(10, 200);

        for attempt in 1..=MAX_ATTEMPTS {
            let leases = self.load().await?;
            let Plan { lease, expected } = plan(&leases, Utc::now())?;
            let value = serde_json::to_string(&lease)?;
            if self.store.compare_and_swap(&self.key(lease.ip), expected, &value).await? {
                return Ok(lease);
            }
            debug!("Lease write for {} lost a race (attempt {})", lease.ip, attempt);
            tokio::time::sleep(backoff.next_backoff()).await;
        }
        warn!("Giving up lease allocation after {} conflicting attempts", MAX_ATTEMPTS);
        Err(LeaseError::PoolExhausted)
    }
}

fn plan_request(
    leases: &BTreeMap<Ipv4Addr, Stored>,
    nic: &str,
    ip: Ipv4Addr,
    now: DateTime<Utc>,
    duration: Duration,
) -> Result<Plan, LeaseError> {
    let no_match = || LeaseError::NoMatch { nic: nic.to_string(), ip };
    let existing = leases.get(&ip);

    if let Some(stored) = existing {
        if stored.lease.nic == nic {
            return Ok(Plan {
                lease: stored.lease.renewed(now, duration),
                expected: Some(stored.mod_revision),
            });
        }
        if !stored.lease.is_expired(now) {
            return Err(no_match());
        }
    }
    let holds_other = leases
        .values()
        .any(|s| s.lease.nic == nic && s.lease.ip != ip && !s.lease.is_expired(now));
    if holds_other {
        return Err(no_match());
    }
    Ok(Plan {
        lease: Lease::new(nic, ip, now, duration),
        expected: existing.map(|s| s.mod_revision),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_client::MemoryStore;
    use std::collections::HashSet;

    const EXPIRE: Duration = Duration::from_secs(100);

    fn pool(store: &MemoryStore, range: u32) -> LeasePool {
        LeasePool::new(Arc::new(store.clone()), "c/leases", Ipv4Addr::new(10, 0, 0, 1), range)
    }

    #[tokio::test]
    async fn test_exhaustive_allocation() {
        let store = MemoryStore::new();
        let pool = pool(&store, 254);

        let mut seen = HashSet::new();
        for i in 0..254 {
            let lease = pool.assign(&format!("nic-{}", i), EXPIRE).await.unwrap();
            assert!(pool.contains(lease.ip));
            assert!(seen.insert(lease.ip), "{} offered twice", lease.ip);
        }
        let expected: HashSet<Ipv4Addr> = (1..=254).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();
        assert_eq!(seen, expected);

        assert!(matches!(pool.assign("nic-late", EXPIRE).await, Err(LeaseError::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_range_change_ignores_out_of_pool_leases() {
        let store = MemoryStore::new();
        let wide = pool(&store, 10);
        for i in 0..4 {
            wide.assign(&format!("nic-{}", i), EXPIRE).await.unwrap();
        }
        let outside = wide.lease_of("nic-3").await.unwrap().unwrap();
        assert_eq!(outside.ip, Ipv4Addr::new(10, 0, 0, 4));

        let narrow = pool(&store, 2);
        assert!(narrow.lease_of("nic-3").await.unwrap().is_none());
        assert!(matches!(narrow.assign("nic-3", EXPIRE).await, Err(LeaseError::PoolExhausted)));
        assert!(matches!(
            narrow.request("nic-3", outside.ip, EXPIRE).await,
            Err(LeaseError::NoMatch { .. })
        ));

        // the stored lease is left as it was
        let stored = wide.lease_of("nic-3").await.unwrap().unwrap();
        assert_eq!(stored.last_assigned, outside.last_assigned);
        assert_eq!(stored.expire_time, outside.expire_time);
    }

    #[tokio::test]
    async fn test_sticky_lease() {
        let store = MemoryStore::new();
        let pool = pool(&store, 254);

        let first = pool.assign("nic-0", EXPIRE).await.unwrap();
        assert_eq!(first.ip, Ipv4Addr::new(10, 0, 0, 1));
        pool.assign("nic-1", EXPIRE).await.unwrap();
        let again = pool.assign("nic-0", EXPIRE).await.unwrap();
        assert_eq!(again.ip, first.ip);
        assert_eq!(again.first_assigned, first.first_assigned);
        assert!(again.last_assigned >= first.last_assigned);
    }

    #[tokio::test]
    async fn test_reclaims_expired() {
        let store = MemoryStore::new();
        let pool = pool(&store, 2);

        pool.assign("a", Duration::ZERO).await.unwrap();
        pool.assign("b", EXPIRE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let reclaimed = pool.assign("c", EXPIRE).await.unwrap();
        assert_eq!(reclaimed.ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(reclaimed.nic, "c");
    }

    #[tokio::test]
    async fn test_request_rules() {
        let store = MemoryStore::new();
        let pool = pool(&store, 10);
        let a = pool.assign("a", EXPIRE).await.unwrap();

        // owner renews
        assert_eq!(pool.request("a", a.ip, EXPIRE).await.unwrap().ip, a.ip);
        // someone else's live lease
        assert!(matches!(pool.request("b", a.ip, EXPIRE).await, Err(LeaseError::NoMatch { .. })));
        // owner asking for a different address while holding a live one
        let other = Ipv4Addr::new(10, 0, 0, 5);
        assert!(matches!(pool.request("a", other, EXPIRE).await, Err(LeaseError::NoMatch { .. })));
        // a free address for a client without a lease
        assert_eq!(pool.request("b", other, EXPIRE).await.unwrap().nic, "b");
        // outside the pool
        assert!(matches!(
            pool.request("c", Ipv4Addr::new(10, 0, 1, 1), EXPIRE).await,
            Err(LeaseError::NoMatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_takes_over_expired_lease() {
        let store = MemoryStore::new();
        let pool = pool(&store, 10);
        let a = pool.assign("a", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let taken = pool.request("b", a.ip, EXPIRE).await.unwrap();
        assert_eq!(taken.nic, "b");
    }

    #[tokio::test]
    async fn test_single_live_lease_per_nic() {
        let store = MemoryStore::new();
        let pool = pool(&store, 10);
        for _ in 0..3 {
            pool.assign("a", EXPIRE).await.unwrap();
        }
        let now = Utc::now();
        let live = pool
            .leases()
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.nic == "a" && !l.is_expired(now))
            .count();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn test_release_and_decline() {
        let store = MemoryStore::new();
        let pool = pool(&store, 10);
        let a = pool.assign("a", EXPIRE).await.unwrap();

        assert!(!pool.release("b", a.ip).await.unwrap());
        assert!(pool.release("a", a.ip).await.unwrap());

        let b = pool.assign("b", EXPIRE).await.unwrap();
        assert!(pool.decline("b", b.ip).await.unwrap());
        let next = pool.assign("b", EXPIRE).await.unwrap();
        assert_ne!(next.ip, b.ip);
    }

    #[tokio::test]
    async fn test_corrupt_lease_is_skipped() {
        let store = MemoryStore::new();
        store.insert("c/leases/10.0.0.1", "not json");
        let pool = pool(&store, 3);

        assert!(pool.leases().await.unwrap().is_empty());
        // the corrupt key still occupies its address
        assert_eq!(pool.assign("a", EXPIRE).await.unwrap().ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(pool.assign("b", EXPIRE).await.unwrap().ip, Ipv4Addr::new(10, 0, 0, 3));
        // then it is overwritten like an expired lease
        assert_eq!(pool.assign("c", EXPIRE).await.unwrap().ip, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[tokio::test]
    async fn test_concurrent_pools_do_not_double_assign() {
        let store = MemoryStore::new();
        let a = pool(&store.connect(), 20);
        let b = pool(&store.connect(), 20);

        let mut tasks = Vec::new();
        for (i, p) in [Arc::new(a), Arc::new(b)].into_iter().enumerate() {
            tasks.push(tokio::spawn(async move {
                let mut ips = Vec::new();
                for n in 0..10 {
                    ips.push(p.assign(&format!("p{}-{}", i, n), EXPIRE).await.unwrap().ip);
                }
                ips
            }));
        }
        let mut all = HashSet::new();
        for task in tasks {
            for ip in task.await.unwrap() {
                assert!(all.insert(ip));
            }
        }
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn test_random_lease_duration_bounds() {
        for _ in 0..100 {
            let d = random_lease_duration();
            assert!(d >= LEASE_MIN && d < LEASE_MAX);
        }
    }

    #[test]
    fn test_lease_json_round_trip() {
        let now = Utc::now();
        let lease = Lease::new("aa:bb:cc:dd:ee:ff", Ipv4Addr::new(10, 0, 0, 7), now, EXPIRE);
        let json = serde_json::to_string(&lease).unwrap();
        assert!(json.contains("\"expireTime\""));
        assert_eq!(serde_json::from_str::<Lease>(&json).unwrap(), lease);
    }
}
