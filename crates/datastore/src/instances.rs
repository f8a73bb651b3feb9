//! Replica instance records.

use crate::error::ElectionError;
use kv_client::{Consistency, KvStore};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::warn;

/// What a replica publishes about itself under `<cluster>/instances/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub ip: Ipv4Addr,
    pub nic: String,
    pub web_port: u16,
    pub version: String,
    pub commit: String,
    pub build_time: String,
    pub debug_mode: bool,
    /// Seconds since the epoch
    pub service_start_time: i64,
}

/// Read every live instance record in directory order.
///
/// Undecodable entries are skipped with a warning.
pub async fn read_instances(store: &dyn KvStore, dir: &str) -> Result<Vec<InstanceInfo>, ElectionError> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let entries = store.list(&prefix, Consistency::Linearizable).await?;
    Ok(entries
        .into_iter()
        .filter_map(|kv| match serde_json::from_str(&kv.value) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Skipping undecodable instance record {}: {}", kv.key, e);
                None
            }
        })
        .collect())
}

/// Concatenated IPv4 octets, the DHCP option 6 payload.
#[must_use]
pub fn concat_addresses(addresses: &[Ipv4Addr]) -> Vec<u8> {
    addresses.iter().flat_map(Ipv4Addr::octets).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_info_json() {
        let info = InstanceInfo {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            nic: "aa:bb:cc:dd:ee:ff".to_string(),
            web_port: 8000,
            version: "0.1.0".to_string(),
            commit: "abc123".to_string(),
            build_time: "2024-01-01T00:00:00Z".to_string(),
            debug_mode: false,
            service_start_time: 1_700_000_000,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"webPort\":8000"));
        assert!(json.contains("\"serviceStartTime\":1700000000"));
        assert_eq!(serde_json::from_str::<InstanceInfo>(&json).unwrap(), info);
    }

    #[test]
    fn test_concat_addresses() {
        assert!(concat_addresses(&[]).is_empty());
        assert_eq!(
            concat_addresses(&[Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(1, 2, 3, 5)]),
            vec![1, 2, 3, 4, 1, 2, 3, 5]
        );
    }
}
