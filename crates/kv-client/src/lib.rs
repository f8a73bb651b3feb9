//! Coordination Store Client
//!
//! A small client for the key-value store shared by every replica of the
//! provisioning control plane. The production backend is etcd, reached through
//! its v3 JSON gateway; tests use the in-memory [`MemoryStore`].
//!
//! # Example
//!
//! ```no_run
//! use kv_client::{Consistency, EtcdClient, KvStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = EtcdClient::new(vec!["http://127.0.0.1:2379".to_string()])?;
//!
//! client.put("cluster/variables/coreos-version", "1632.3.0").await?;
//! let entry = client
//!     .get("cluster/variables/coreos-version", Consistency::Serializable)
//!     .await?;
//! assert_eq!(entry.map(|kv| kv.value), Some("1632.3.0".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Ordered inserts**: `create_in_order` mirrors etcd v2 in-order keys on top of v3 revisions
//! - **Leases**: TTL-bound keys with keep-alive and revoke
//! - **Compare-and-swap**: revision-guarded writes for optimistic concurrency
//! - **`test-util`**: enables the in-memory `MemoryStore`

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod kv_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::EtcdClient;
pub use common::HttpClient;
pub use error::StoreError;
pub use models::*;
pub use kv_trait::KvStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MemoryStore;
