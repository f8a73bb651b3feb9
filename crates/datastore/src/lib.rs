//! Provisioning Datastore
//!
//! Everything the control plane keeps in the coordination store, behind typed
//! APIs: the active/standby [`Election`], the DHCP [`LeasePool`], machine
//! records and variables through the [`DataStore`] façade, plus the models
//! shared with the boot servers and the management API.
//!
//! # Example
//!
//! ```no_run
//! use datastore::{DataStore, DataStoreConfig, MacAddr};
//! use kv_client::EtcdClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(EtcdClient::new(vec!["http://127.0.0.1:2379".to_string()])?);
//! let ds = DataStore::new(
//!     store,
//!     DataStoreConfig {
//!         cluster_name: "cluster".to_string(),
//!         workspace: "/workspace".into(),
//!         lease_start: "10.0.0.10".parse()?,
//!         lease_range: 200,
//!     },
//! );
//!
//! let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse()?;
//! ds.set_machine_variable(&mac, "role", "worker").await?;
//! println!("{}", ds.hostname(&mac).await?);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod backoff;
pub mod datastore;
pub mod election;
pub mod error;
pub mod instances;
pub mod keys;
pub mod leases;
pub mod mac;
pub mod machine;
pub mod seed;
pub mod variables;

pub use agent::{AgentCommand, AgentHeartbeat, UnknownCommand};
pub use datastore::{DataStore, DataStoreConfig};
pub use election::{Election, TTL_ACTIVE, TTL_MASTER, TTL_STANDBY};
pub use error::{DataStoreError, ElectionError, LeaseError};
pub use instances::InstanceInfo;
pub use keys::{Keys, dotted_to_path};
pub use leases::{Lease, LeasePool, random_lease_duration};
pub use mac::{MacAddr, ParseMacError};
pub use machine::{MachineRecord, MachineType};
pub use variables::{ClasslessRoute, NetworkConfiguration, Scope, ValidationError};
