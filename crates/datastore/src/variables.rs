//! Cluster and machine variables: naming rules and the structured values
//! stored under reserved keys.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Cluster variable holding the OS release to boot.
pub const COREOS_VERSION: &str = "coreos-version";
/// Cluster variable holding the JSON [`NetworkConfiguration`].
pub const NETWORK_CONFIGURATION: &str = "net-conf";
/// Machine variable overriding the derived host name.
pub const HOSTNAME: &str = "hostname";
/// Machine variable marking a machine as a control-plane server.
pub const SERVER_TAG: &str = "blacksmith_server";

/// Keys that may not hold an empty value.
const NON_EMPTY: [&str; 2] = [COREOS_VERSION, NETWORK_CONFIGURATION];

/// Which namespace a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Cluster,
    Machine,
}

/// Variable rejected by the naming rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty value for key is not permitted")]
    EmptyKey,

    #[error("hidden key is not permitted")]
    HiddenKey,

    #[error("empty value for {0:?} is not permitted")]
    EmptyValue(String),

    #[error("hashtagged keys are only permitted for cluster-wide variables")]
    TagOnMachine,

    #[error("invalid network configuration: {0}")]
    NetworkConfiguration(String),

    #[error("invalid hardware address: {0}")]
    HardwareAddress(String),
}

/// Whether a key is hidden from listings.
#[must_use]
pub fn is_hidden(key: &str) -> bool {
    key.starts_with('_')
}

/// Check a key/value pair before it is written.
pub fn validate_variable(key: &str, value: &str, scope: Scope) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if is_hidden(key) {
        return Err(ValidationError::HiddenKey);
    }
    if value.is_empty() && NON_EMPTY.contains(&key) {
        return Err(ValidationError::EmptyValue(key.to_string()));
    }
    if scope == Scope::Machine && key.starts_with('#') {
        return Err(ValidationError::TagOnMachine);
    }
    if key == NETWORK_CONFIGURATION {
        NetworkConfiguration::parse(value)?;
    }
    Ok(())
}

/// Check only the key, for reads and deletes.
pub fn validate_key(key: &str, scope: Scope) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if scope == Scope::Machine && key.starts_with('#') {
        return Err(ValidationError::TagOnMachine);
    }
    Ok(())
}

/// Network settings handed to clients over DHCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    pub netmask: Ipv4Addr,
    pub router: Ipv4Addr,
    #[serde(default)]
    pub classless_route_option: Vec<ClasslessRoute>,
}

impl NetworkConfiguration {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let conf: Self =
            serde_json::from_str(text).map_err(|e| ValidationError::NetworkConfiguration(e.to_string()))?;
        if let Some(route) = conf.classless_route_option.iter().find(|r| r.size > 32) {
            return Err(ValidationError::NetworkConfiguration(format!(
                "route to {} has prefix length {}",
                route.destination, route.size
            )));
        }
        Ok(conf)
    }

    /// RFC 3442 option payload, `None` without routes.
    #[must_use]
    pub fn classless_routes_bytes(&self) -> Option<Vec<u8>> {
        if self.classless_route_option.is_empty() {
            return None;
        }
        Some(
            self.classless_route_option
                .iter()
                .flat_map(ClasslessRoute::to_bytes)
                .collect(),
        )
    }
}

/// One RFC 3442 classless static route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClasslessRoute {
    pub router: Ipv4Addr,
    /// Prefix length of the destination
    pub size: u8,
    pub destination: Ipv4Addr,
}

impl ClasslessRoute {
    /// `<width> <significant destination octets> <router>`
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let width = self.size.min(32);
        let significant = usize::from(width).div_ceil(8);
        let mut bytes = Vec::with_capacity(1 + significant + 4);
        bytes.push(width);
        bytes.extend_from_slice(&self.destination.octets()[..significant]);
        bytes.extend_from_slice(&self.router.octets());
        bytes
    }
}
