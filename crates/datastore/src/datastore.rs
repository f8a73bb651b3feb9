//! # DataStore
//!
//! Typed access to everything the control plane keeps in the coordination
//! store: cluster and machine variables, machine records, the lease pool,
//! instance records, agent heartbeats and commands, and the workspace
//! update marker.
//!
//! Variable operations run under [`VARIABLE_DEADLINE`], bulk listings under
//! [`LISTING_DEADLINE`].

use crate::agent::{self, AgentCommand, AgentHeartbeat};
use crate::election::Election;
use crate::error::DataStoreError;
use crate::instances::{InstanceInfo, concat_addresses, read_instances};
use crate::keys::Keys;
use crate::leases::{LeasePool, random_lease_duration};
use crate::mac::MacAddr;
use crate::machine::{self, MachineRecord, MachineType, now_nanos};
use crate::seed::read_seed;
use crate::variables::{
    self, COREOS_VERSION, NETWORK_CONFIGURATION, NetworkConfiguration, Scope, is_hidden,
    validate_key, validate_variable,
};
use kv_client::{Consistency, KvStore, StoreError};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deadline for single-key variable operations.
pub const VARIABLE_DEADLINE: Duration = Duration::from_secs(3);
/// Deadline for directory listings.
pub const LISTING_DEADLINE: Duration = Duration::from_secs(2);

/// Static settings of a [`DataStore`].
#[derive(Debug, Clone)]
pub struct DataStoreConfig {
    pub cluster_name: String,
    pub workspace: PathBuf,
    pub lease_start: Ipv4Addr,
    pub lease_range: u32,
}

async fn deadline<T, F>(limit: Duration, future: F) -> Result<T, DataStoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout(limit).into()),
    }
}

/// Façade over the coordination store.
pub struct DataStore {
    store: Arc<dyn KvStore>,
    keys: Keys,
    workspace: PathBuf,
    leases: Arc<LeasePool>,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("cluster", &self.keys.cluster())
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl DataStore {
    pub fn new(store: Arc<dyn KvStore>, config: DataStoreConfig) -> Self {
        let keys = Keys::new(config.cluster_name);
        let leases = Arc::new(LeasePool::new(
            store.clone(),
            keys.leases_dir(),
            config.lease_start,
            config.lease_range,
        ));
        Self {
            store,
            keys,
            workspace: config.workspace,
            leases,
        }
    }

    pub fn cluster_name(&self) -> &str {
        self.keys.cluster()
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn lease_pool(&self) -> &Arc<LeasePool> {
        &self.leases
    }

    /// Election participant for this cluster's instance directory.
    pub fn election(&self, info: InstanceInfo) -> Election {
        Election::new(self.store.clone(), self.keys.instances_dir(), info)
    }

    async fn read(&self, key: &str) -> Result<Option<String>, DataStoreError> {
        let entry = deadline(VARIABLE_DEADLINE, self.store.get(key, Consistency::Serializable)).await?;
        Ok(entry.map(|kv| kv.value))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), DataStoreError> {
        deadline(VARIABLE_DEADLINE, self.store.put(key, value)).await?;
        Ok(())
    }

    /// Entries under `dir/`, keyed relative to it.
    async fn read_dir(&self, dir: &str) -> Result<BTreeMap<String, String>, DataStoreError> {
        let prefix = format!("{}/", dir);
        let entries = deadline(LISTING_DEADLINE, self.store.list(&prefix, Consistency::Serializable)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|kv| {
                let relative = kv.key.strip_prefix(&prefix)?.to_string();
                Some((relative, kv.value))
            })
            .collect())
    }

    // Cluster variables

    fn cluster_variable_key(&self, key: &str) -> String {
        self.keys.join(&["variables", key])
    }

    pub async fn get_cluster_variable(&self, key: &str) -> Result<Option<String>, DataStoreError> {
        validate_key(key, Scope::Cluster)?;
        self.read(&self.cluster_variable_key(key)).await
    }

    pub async fn set_cluster_variable(&self, key: &str, value: &str) -> Result<(), DataStoreError> {
        validate_variable(key, value, Scope::Cluster)?;
        self.write(&self.cluster_variable_key(key), value).await?;
        info!("Set cluster variable {}", key);
        Ok(())
    }

    /// Delete a cluster variable and anything nested below it.
    pub async fn delete_cluster_variable(&self, key: &str) -> Result<bool, DataStoreError> {
        validate_key(key, Scope::Cluster)?;
        let full = self.cluster_variable_key(key);
        let existed = deadline(VARIABLE_DEADLINE, self.store.delete(&full)).await?;
        let nested = deadline(VARIABLE_DEADLINE, self.store.delete_prefix(&format!("{}/", full))).await?;
        Ok(existed || nested > 0)
    }

    /// Visible flat cluster variables.
    pub async fn list_cluster_variables(&self) -> Result<BTreeMap<String, String>, DataStoreError> {
        Ok(visible(self.read_dir(&self.keys.variables_dir()).await?))
    }

    /// A cluster variable read as a list of strings.
    ///
    /// Indexed children (`k/0`, `k/1`, ...) win; otherwise the value itself is
    /// read as a JSON string array, or taken as a single item.
    pub async fn array_variable(&self, key: &str) -> Result<Vec<String>, DataStoreError> {
        validate_key(key, Scope::Cluster)?;
        let children = self.read_dir(&self.cluster_variable_key(key)).await?;
        let mut indexed: Vec<(u64, String)> = children
            .into_iter()
            .filter_map(|(k, v)| Some((k.parse::<u64>().ok()?, v)))
            .collect();
        if !indexed.is_empty() {
            indexed.sort_by_key(|(i, _)| *i);
            return Ok(indexed.into_iter().map(|(_, v)| v).collect());
        }

        let Some(value) = self.get_cluster_variable(key).await? else {
            return Ok(Vec::new());
        };
        if let Ok(items) = serde_json::from_str::<Vec<String>>(&value) {
            return Ok(items);
        }
        Ok(if value.is_empty() { Vec::new() } else { vec![value] })
    }

    // Machine variables

    fn machine_key(&self, mac: &MacAddr, key: &str) -> String {
        self.keys.join(&["machines", &mac.to_string(), key])
    }

    pub async fn get_machine_variable(&self, mac: &MacAddr, key: &str) -> Result<Option<String>, DataStoreError> {
        validate_key(key, Scope::Machine)?;
        self.read(&self.machine_key(mac, key)).await
    }

    pub async fn set_machine_variable(&self, mac: &MacAddr, key: &str, value: &str) -> Result<(), DataStoreError> {
        validate_variable(key, value, Scope::Machine)?;
        self.write(&self.machine_key(mac, key), value).await?;
        info!("Set variable {} for {}", key, mac);
        Ok(())
    }

    pub async fn delete_machine_variable(&self, mac: &MacAddr, key: &str) -> Result<bool, DataStoreError> {
        validate_key(key, Scope::Machine)?;
        if is_hidden(key) {
            return Err(variables::ValidationError::HiddenKey.into());
        }
        deadline(VARIABLE_DEADLINE, self.store.delete(&self.machine_key(mac, key))).await
    }

    /// Visible flat variables of one machine.
    pub async fn list_machine_variables(&self, mac: &MacAddr) -> Result<BTreeMap<String, String>, DataStoreError> {
        Ok(visible(self.read_dir(&self.keys.machine(&mac.to_string())).await?))
    }

    // Machine records

    /// The record for `mac`; with `create`, a missing record is created and
    /// leased an address.
    pub async fn machine_record(&self, mac: &MacAddr, create: bool) -> Result<Option<MachineRecord>, DataStoreError> {
        let entries = self.read_dir(&self.keys.machine(&mac.to_string())).await?;
        if let Some(record) = MachineRecord::from_entries(*mac, &entries) {
            return Ok(Some(record));
        }
        if !create {
            return Ok(None);
        }
        let lease = self
            .leases
            .assign(&mac.to_string(), random_lease_duration())
            .await?;
        self.record_assignment(mac, lease.ip, MachineType::Normal).await.map(Some)
    }

    /// Persist that `mac` holds `ip`, creating the record on first sight.
    pub async fn record_assignment(
        &self,
        mac: &MacAddr,
        ip: Ipv4Addr,
        machine_type: MachineType,
    ) -> Result<MachineRecord, DataStoreError> {
        let now = now_nanos().to_string();
        let first_seen_key = self.machine_key(mac, machine::FIRST_SEEN);
        let created = deadline(
            VARIABLE_DEADLINE,
            self.store.compare_and_swap(&first_seen_key, None, &now),
        )
        .await?;
        if created {
            info!("New machine {} at {}", mac, ip);
            self.write(&self.machine_key(mac, machine::TYPE), &machine_type.code().to_string())
                .await?;
        }
        self.write(&self.machine_key(mac, machine::IP), &ip.to_string()).await?;
        self.write(&self.machine_key(mac, machine::LAST_SEEN), &now).await?;

        Box::pin(self.machine_record(mac, false))
            .await?
            .ok_or_else(|| DataStoreError::NotFound(format!("machine {}", mac)))
    }

    /// Record this instance's own interface as a control-plane server.
    pub async fn register_server(&self, mac: &MacAddr, ip: Ipv4Addr) -> Result<MachineRecord, DataStoreError> {
        let record = self.record_assignment(mac, ip, MachineType::Static).await?;
        self.write(&self.machine_key(mac, variables::SERVER_TAG), "true").await?;
        Ok(record)
    }

    /// Refresh `_last_seen`.
    pub async fn check_in(&self, mac: &MacAddr) -> Result<(), DataStoreError> {
        self.write(&self.machine_key(mac, machine::LAST_SEEN), &now_nanos().to_string())
            .await
    }

    /// Remove a machine and all of its variables.
    pub async fn delete_machine(&self, mac: &MacAddr) -> Result<bool, DataStoreError> {
        let prefix = format!("{}/", self.keys.machine(&mac.to_string()));
        let removed = deadline(VARIABLE_DEADLINE, self.store.delete_prefix(&prefix)).await?;
        if removed > 0 {
            info!("Deleted machine {}", mac);
        }
        Ok(removed > 0)
    }

    /// Every machine directory, parsed, keyed by address.
    async fn machine_entries(&self) -> Result<BTreeMap<MacAddr, BTreeMap<String, String>>, DataStoreError> {
        let mut machines: BTreeMap<MacAddr, BTreeMap<String, String>> = BTreeMap::new();
        for (relative, value) in self.read_dir(&self.keys.machines_dir()).await? {
            let Some((name, key)) = relative.split_once('/') else {
                continue;
            };
            match name.parse::<MacAddr>() {
                Ok(mac) => {
                    machines.entry(mac).or_default().insert(key.to_string(), value);
                }
                Err(e) => debug!("Ignoring machine directory {}: {}", name, e),
            }
        }
        Ok(machines)
    }

    /// Every known machine, in address order.
    pub async fn machines(&self) -> Result<Vec<MachineRecord>, DataStoreError> {
        Ok(self
            .machine_entries()
            .await?
            .iter()
            .filter_map(|(mac, entries)| MachineRecord::from_entries(*mac, entries))
            .collect())
    }

    /// The `hostname` machine variable, or `node<mac>` when unset.
    pub async fn hostname(&self, mac: &MacAddr) -> Result<String, DataStoreError> {
        let custom = self.get_machine_variable(mac, variables::HOSTNAME).await?;
        Ok(custom
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| mac.hostname()))
    }

    /// Address of the machine whose host name is `name`, case-insensitively.
    pub async fn resolve_hostname(&self, name: &str) -> Result<Option<Ipv4Addr>, DataStoreError> {
        let machines = self.machine_entries().await?;
        Ok(machines.iter().find_map(|(mac, entries)| {
            let hostname = entries
                .get(variables::HOSTNAME)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| mac.hostname());
            if !hostname.eq_ignore_ascii_case(name) {
                return None;
            }
            entries.get(machine::IP)?.parse().ok()
        }))
    }

    /// Addresses of machines tagged as control-plane servers, in address order.
    pub async fn server_addresses(&self) -> Result<Vec<Ipv4Addr>, DataStoreError> {
        let machines = self.machine_entries().await?;
        Ok(machines
            .values()
            .filter(|entries| entries.get(variables::SERVER_TAG).map(String::as_str) == Some("true"))
            .filter_map(|entries| entries.get(machine::IP)?.parse().ok())
            .collect())
    }

    // Workspace-backed values

    /// Directory of a release's boot images.
    pub fn images_dir(&self, version: &str) -> PathBuf {
        self.workspace.join("images").join(version)
    }

    /// Copy `initial.yaml` into the cluster variables, keeping existing values.
    /// Returns how many keys were written.
    pub async fn seed_from_workspace(&self) -> Result<usize, DataStoreError> {
        let mut written = 0;
        for (key, value) in read_seed(&self.workspace).await? {
            let full = self.cluster_variable_key(&key);
            let current = self.read(&full).await?;
            if current.as_deref().is_none_or(str::is_empty) {
                self.write(&full, &value).await?;
                written += 1;
            }
        }
        info!("Seeded {} variables from the workspace", written);
        Ok(written)
    }

    /// The release to boot.
    ///
    /// Seeds from `initial.yaml` when the variable is missing, and fails when
    /// the workspace has no images for the release.
    pub async fn coreos_version(&self) -> Result<String, DataStoreError> {
        let mut version = self.get_cluster_variable(COREOS_VERSION).await?;
        if version.as_deref().is_none_or(str::is_empty) {
            warn!("{} is not set, seeding from the workspace", COREOS_VERSION);
            self.seed_from_workspace().await?;
            version = self.get_cluster_variable(COREOS_VERSION).await?;
        }
        let version = version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DataStoreError::Workspace(format!("no {} configured", COREOS_VERSION)))?;

        let images = self.images_dir(&version);
        let is_dir = tokio::fs::metadata(&images).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(DataStoreError::Workspace(format!(
                "no images for {} at {}",
                version,
                images.display()
            )));
        }
        Ok(version)
    }

    /// Parsed `net-conf`, if set.
    pub async fn network_configuration(&self) -> Result<Option<NetworkConfiguration>, DataStoreError> {
        let Some(text) = self.get_cluster_variable(NETWORK_CONFIGURATION).await? else {
            return Ok(None);
        };
        NetworkConfiguration::parse(&text)
            .map(Some)
            .map_err(|e| DataStoreError::Corrupt {
                key: NETWORK_CONFIGURATION.to_string(),
                reason: e.to_string(),
            })
    }

    // Instances

    /// Live instance records in election order.
    pub async fn instances(&self) -> Result<Vec<InstanceInfo>, DataStoreError> {
        let dir = self.keys.instances_dir();
        match tokio::time::timeout(LISTING_DEADLINE, read_instances(self.store.as_ref(), &dir)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(LISTING_DEADLINE).into()),
        }
    }

    /// Live instance addresses as a DHCP option 6 payload.
    pub async fn dns_addresses_for_dhcp(&self) -> Result<Vec<u8>, DataStoreError> {
        let addresses: Vec<Ipv4Addr> = self.instances().await?.iter().map(|i| i.ip).collect();
        Ok(concat_addresses(&addresses))
    }

    // Agent

    pub async fn set_heartbeat(&self, mac: &MacAddr, heartbeat: &AgentHeartbeat) -> Result<(), DataStoreError> {
        let value = serde_json::to_string(heartbeat)?;
        self.write(&self.machine_key(mac, agent::HEARTBEAT), &value).await?;
        debug!("Heartbeat from {}: {}", mac, heartbeat.status);
        Ok(())
    }

    pub async fn heartbeat(&self, mac: &MacAddr) -> Result<Option<AgentHeartbeat>, DataStoreError> {
        let key = self.machine_key(mac, agent::HEARTBEAT);
        let Some(text) = self.read(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| DataStoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    pub async fn send_command(&self, mac: &MacAddr, command: AgentCommand) -> Result<(), DataStoreError> {
        self.write(&self.machine_key(mac, agent::COMMAND), command.as_str()).await?;
        info!("Sent {} to {}", command, mac);
        Ok(())
    }

    /// The command waiting for the agent, if any.
    pub async fn pending_command(&self, mac: &MacAddr) -> Result<Option<AgentCommand>, DataStoreError> {
        let key = self.machine_key(mac, agent::COMMAND);
        match self.read(&key).await? {
            None => Ok(None),
            Some(text) if text.is_empty() => Ok(None),
            Some(text) => text.parse().map(Some).map_err(|e: agent::UnknownCommand| DataStoreError::Corrupt {
                key,
                reason: e.to_string(),
            }),
        }
    }

    // Workspace update marker

    /// Ask every replica to reload its workspace. Returns the marker revision.
    pub async fn signal_workspace_update(&self) -> Result<i64, DataStoreError> {
        let stamp = chrono::Utc::now().to_rfc3339();
        let revision = deadline(VARIABLE_DEADLINE, self.store.put(&self.keys.workspace_update(), &stamp)).await?;
        info!("Signalled workspace update at revision {}", revision);
        Ok(revision)
    }

    /// Revision of the last update marker, 0 when never signalled.
    pub async fn workspace_update_revision(&self) -> Result<i64, DataStoreError> {
        let entry = deadline(
            VARIABLE_DEADLINE,
            self.store.get(&self.keys.workspace_update(), Consistency::Serializable),
        )
        .await?;
        Ok(entry.map_or(0, |kv| kv.mod_revision))
    }
}

/// Drop hidden and nested keys from a directory listing.
fn visible(entries: BTreeMap<String, String>) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .filter(|(k, _)| !is_hidden(k) && !k.contains('/'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::ValidationError;
    use kv_client::MemoryStore;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn datastore(store: &MemoryStore, workspace: &Path) -> DataStore {
        DataStore::new(
            Arc::new(store.clone()),
            DataStoreConfig {
                cluster_name: "c".to_string(),
                workspace: workspace.to_path_buf(),
                lease_start: Ipv4Addr::new(10, 0, 0, 1),
                lease_range: 10,
            },
        )
    }

    #[tokio::test]
    async fn test_cluster_variable_round_trip() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());

        ds.set_cluster_variable("ntp", "pool.ntp.org").await.unwrap();
        assert_eq!(ds.get_cluster_variable("ntp").await.unwrap().as_deref(), Some("pool.ntp.org"));
        assert_eq!(store.dump().get("c/variables/ntp").map(String::as_str), Some("pool.ntp.org"));

        assert!(ds.delete_cluster_variable("ntp").await.unwrap());
        assert!(ds.get_cluster_variable("ntp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());

        assert!(matches!(
            ds.set_cluster_variable("", "x").await,
            Err(DataStoreError::Validation(ValidationError::EmptyKey))
        ));
        assert!(matches!(
            ds.set_cluster_variable("_secret", "x").await,
            Err(DataStoreError::Validation(ValidationError::HiddenKey))
        ));
        assert!(matches!(
            ds.set_cluster_variable(COREOS_VERSION, "").await,
            Err(DataStoreError::Validation(ValidationError::EmptyValue(_)))
        ));
        assert!(matches!(
            ds.set_cluster_variable(NETWORK_CONFIGURATION, "{not json").await,
            Err(DataStoreError::Validation(ValidationError::NetworkConfiguration(_)))
        ));
        assert!(matches!(
            ds.set_machine_variable(&mac(1), "#tag", "x").await,
            Err(DataStoreError::Validation(ValidationError::TagOnMachine))
        ));
        ds.set_cluster_variable("#tag", "").await.unwrap();
    }

    #[tokio::test]
    async fn test_listings_hide_underscore_keys() {
        let store = MemoryStore::new();
        store.insert("c/variables/_internal", "x");
        store.insert("c/variables/list/0", "a");
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        ds.set_cluster_variable("visible", "1").await.unwrap();

        let vars = ds.list_cluster_variables().await.unwrap();
        assert_eq!(vars.keys().collect::<Vec<_>>(), vec!["visible"]);

        let m = mac(1);
        ds.record_assignment(&m, Ipv4Addr::new(10, 0, 0, 5), MachineType::Normal)
            .await
            .unwrap();
        ds.set_machine_variable(&m, "role", "db").await.unwrap();
        let vars = ds.list_machine_variables(&m).await.unwrap();
        assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec![("role".to_string(), "db".to_string())]);
    }

    #[tokio::test]
    async fn test_array_variable() {
        let store = MemoryStore::new();
        store.insert("c/variables/keys/1", "second");
        store.insert("c/variables/keys/0", "first");
        store.insert("c/variables/keys/10", "eleventh");
        store.insert("c/variables/json", r#"["a","b"]"#);
        store.insert("c/variables/single", "only");
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());

        assert_eq!(ds.array_variable("keys").await.unwrap(), vec!["first", "second", "eleventh"]);
        assert_eq!(ds.array_variable("json").await.unwrap(), vec!["a", "b"]);
        assert_eq!(ds.array_variable("single").await.unwrap(), vec!["only"]);
        assert!(ds.array_variable("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_machine_record_creation_assigns_lease() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        let m = mac(7);

        assert!(ds.machine_record(&m, false).await.unwrap().is_none());
        let record = ds.machine_record(&m, true).await.unwrap().unwrap();
        assert_eq!(record.ip, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(record.machine_type, MachineType::Normal);
        assert!(record.first_seen > 0);

        // existing record is returned as is
        let again = ds.machine_record(&m, true).await.unwrap().unwrap();
        assert_eq!(again.first_seen, record.first_seen);
        assert_eq!(ds.machines().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_check_in_and_delete() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        let m = mac(2);
        let record = ds
            .record_assignment(&m, Ipv4Addr::new(10, 0, 0, 2), MachineType::Normal)
            .await
            .unwrap();

        ds.check_in(&m).await.unwrap();
        let after = ds.machine_record(&m, false).await.unwrap().unwrap();
        assert!(after.last_seen >= record.last_seen);

        assert!(ds.delete_machine(&m).await.unwrap());
        assert!(ds.machine_record(&m, false).await.unwrap().is_none());
        assert!(!ds.delete_machine(&m).await.unwrap());
    }

    #[tokio::test]
    async fn test_hostname_resolution() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        let (a, b) = (mac(1), mac(2));
        ds.record_assignment(&a, Ipv4Addr::new(10, 0, 0, 1), MachineType::Normal)
            .await
            .unwrap();
        ds.record_assignment(&b, Ipv4Addr::new(10, 0, 0, 2), MachineType::Normal)
            .await
            .unwrap();
        ds.set_machine_variable(&b, "hostname", "db1").await.unwrap();

        assert_eq!(ds.hostname(&a).await.unwrap(), "nodeaabbccddee01");
        assert_eq!(ds.hostname(&b).await.unwrap(), "db1");
        assert_eq!(
            ds.resolve_hostname("NODEAABBCCDDEE01").await.unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert_eq!(ds.resolve_hostname("db1").await.unwrap(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(ds.resolve_hostname("nodeaabbccddee02").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_addresses() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        ds.register_server(&mac(3), Ipv4Addr::new(10, 0, 0, 11)).await.unwrap();
        ds.register_server(&mac(1), Ipv4Addr::new(10, 0, 0, 10)).await.unwrap();
        ds.record_assignment(&mac(2), Ipv4Addr::new(10, 0, 0, 12), MachineType::Normal)
            .await
            .unwrap();

        assert_eq!(
            ds.server_addresses().await.unwrap(),
            vec![Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 11)]
        );
        let record = ds.machine_record(&mac(3), false).await.unwrap().unwrap();
        assert_eq!(record.machine_type, MachineType::Static);
    }

    #[tokio::test]
    async fn test_coreos_version_seeds_and_checks_images() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("initial.yaml"),
            "coreos-version: \"1068.2.0\"\nntp: pool.ntp.org\n",
        )
        .unwrap();
        let ds = datastore(&store, dir.path());
        ds.set_cluster_variable("ntp", "local").await.unwrap();

        // no images directory yet
        assert!(matches!(ds.coreos_version().await, Err(DataStoreError::Workspace(_))));
        // the seed ran but kept the existing value
        assert_eq!(ds.get_cluster_variable("ntp").await.unwrap().as_deref(), Some("local"));

        std::fs::create_dir_all(dir.path().join("images/1068.2.0")).unwrap();
        assert_eq!(ds.coreos_version().await.unwrap(), "1068.2.0");
    }

    #[tokio::test]
    async fn test_network_configuration() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        assert!(ds.network_configuration().await.unwrap().is_none());

        ds.set_cluster_variable(
            NETWORK_CONFIGURATION,
            r#"{"netmask":"255.255.255.0","router":"10.0.0.254","classlessRouteOption":[]}"#,
        )
        .await
        .unwrap();
        let conf = ds.network_configuration().await.unwrap().unwrap();
        assert_eq!(conf.router, Ipv4Addr::new(10, 0, 0, 254));

        store.insert("c/variables/net-conf", "garbage");
        assert!(matches!(ds.network_configuration().await, Err(DataStoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_dns_addresses_follow_instances() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        for last in [2u8, 3] {
            let info = InstanceInfo {
                ip: Ipv4Addr::new(10, 0, 0, last),
                nic: mac(last).to_string(),
                web_port: 8000,
                version: "test".to_string(),
                commit: String::new(),
                build_time: String::new(),
                debug_mode: false,
                service_start_time: 0,
            };
            ds.election(info).register_self().await.unwrap();
        }
        assert_eq!(ds.dns_addresses_for_dhcp().await.unwrap(), vec![10, 0, 0, 2, 10, 0, 0, 3]);
    }

    #[tokio::test]
    async fn test_agent_channel() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        let m = mac(9);

        assert!(ds.pending_command(&m).await.unwrap().is_none());
        ds.send_command(&m, AgentCommand::Reboot).await.unwrap();
        assert_eq!(ds.pending_command(&m).await.unwrap(), Some(AgentCommand::Reboot));
        assert_eq!(
            store.dump().get("c/machines/aa:bb:cc:dd:ee:09/agent/command").map(String::as_str),
            Some("reboot")
        );

        let hb = AgentHeartbeat {
            status: "ok".to_string(),
            age: 12,
            ..Default::default()
        };
        ds.set_heartbeat(&m, &hb).await.unwrap();
        assert_eq!(ds.heartbeat(&m).await.unwrap(), Some(hb));
        assert!(ds.list_machine_variables(&m).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_update_marker() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let ds = datastore(&store, dir.path());
        assert_eq!(ds.workspace_update_revision().await.unwrap(), 0);
        let revision = ds.signal_workspace_update().await.unwrap();
        assert_eq!(ds.workspace_update_revision().await.unwrap(), revision);
    }
}
