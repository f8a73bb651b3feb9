//! Machine records.
//!
//! A machine is a directory `<cluster>/machines/<mac>/` holding the hidden
//! fields `_first_seen`, `_last_seen` (nanoseconds), `_IP` and `_type`, next
//! to its variables.

use crate::mac::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const FIRST_SEEN: &str = "_first_seen";
pub const LAST_SEEN: &str = "_last_seen";
pub const IP: &str = "_IP";
pub const TYPE: &str = "_type";

/// How a machine got its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    /// Leased over DHCP
    #[default]
    Normal,
    /// Address fixed by an operator or the instance itself
    Static,
    /// Baseboard management controller
    Bmc,
}

impl MachineType {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            MachineType::Normal => 1,
            MachineType::Static => 2,
            MachineType::Bmc => 3,
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(MachineType::Normal),
            "2" => Some(MachineType::Static),
            "3" => Some(MachineType::Bmc),
            _ => None,
        }
    }
}

/// Everything known about one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRecord {
    pub mac: MacAddr,
    pub ip: Option<Ipv4Addr>,
    /// Nanoseconds since the epoch
    pub first_seen: i64,
    /// Nanoseconds since the epoch, 0 for never
    pub last_seen: i64,
    #[serde(rename = "type")]
    pub machine_type: MachineType,
}

impl MachineRecord {
    /// Assemble from a machine directory's entries, keyed relative to it.
    ///
    /// Returns `None` when `_first_seen` is absent, i.e. the machine was
    /// never created.
    pub fn from_entries(mac: MacAddr, entries: &BTreeMap<String, String>) -> Option<Self> {
        let first_seen = entries.get(FIRST_SEEN)?.trim().parse().ok()?;
        Some(Self {
            mac,
            ip: entries.get(IP).and_then(|ip| ip.trim().parse().ok()),
            first_seen,
            last_seen: entries
                .get(LAST_SEEN)
                .and_then(|t| t.trim().parse().ok())
                .unwrap_or(0),
            machine_type: entries
                .get(TYPE)
                .and_then(|t| MachineType::from_code(t))
                .unwrap_or_default(),
        })
    }
}

/// Current time in nanoseconds since the epoch.
#[must_use]
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddr {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn test_from_entries() {
        let entries: BTreeMap<String, String> = [
            (FIRST_SEEN, "100"),
            (LAST_SEEN, "200"),
            (IP, "10.0.0.9"),
            (TYPE, "2"),
            ("hostname", "db1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let record = MachineRecord::from_entries(mac(), &entries).unwrap();
        assert_eq!(record.ip, Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(record.first_seen, 100);
        assert_eq!(record.last_seen, 200);
        assert_eq!(record.machine_type, MachineType::Static);
    }

    #[test]
    fn test_missing_first_seen_is_unknown() {
        let entries = BTreeMap::from([(IP.to_string(), "10.0.0.9".to_string())]);
        assert!(MachineRecord::from_entries(mac(), &entries).is_none());
    }

    #[test]
    fn test_type_codes() {
        for t in [MachineType::Normal, MachineType::Static, MachineType::Bmc] {
            assert_eq!(MachineType::from_code(&t.code().to_string()), Some(t));
        }
        assert_eq!(MachineType::from_code("9"), None);
    }
}
