//! Process configuration from `PROVISIONER_*` environment variables.

use crate::error::ControllerError;
use datastore::MacAddr;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use templating::ServerAddrs;

pub const DEFAULT_HTTP_LISTEN: &str = "0.0.0.0:8000";
pub const DEFAULT_WORKSPACE: &str = "/workspace";
pub const DEFAULT_CLUSTER_NAME: &str = "cluster";
pub const DEFAULT_ETCD_ENDPOINTS: &str = "http://127.0.0.1:2379";

/// Build metadata published in the instance record.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("PROVISIONER_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};
pub const BUILD_TIME: &str = match option_env!("PROVISIONER_BUILD_TIME") {
    Some(time) => time,
    None => "unknown",
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub server_mac: MacAddr,
    pub http_listen: SocketAddr,
    pub workspace: PathBuf,
    pub cluster_name: String,
    pub etcd_endpoints: Vec<String>,
    pub lease_start: Ipv4Addr,
    pub lease_range: u32,
    pub dns: bool,
    pub boot_assets: PathBuf,
    pub debug: bool,
}

/// Whether a flag value reads as on.
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{} {:?}: {}", name, value, e)))
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ControllerError::InvalidConfig(format!("{} environment variable is required", name)))
        };
        let optional = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let server_ip = parse("PROVISIONER_SERVER_IP", &required("PROVISIONER_SERVER_IP")?)?;
        let server_mac = parse("PROVISIONER_SERVER_MAC", &optional("PROVISIONER_SERVER_MAC", "00:00:00:00:00:00"))?;
        let http_listen = parse("PROVISIONER_HTTP_LISTEN", &optional("PROVISIONER_HTTP_LISTEN", DEFAULT_HTTP_LISTEN))?;
        let workspace = PathBuf::from(optional("PROVISIONER_WORKSPACE", DEFAULT_WORKSPACE));

        let cluster_name = optional("PROVISIONER_CLUSTER_NAME", DEFAULT_CLUSTER_NAME);
        if cluster_name.is_empty() || cluster_name.contains(['/', ' ']) {
            return Err(ControllerError::InvalidConfig(format!(
                "PROVISIONER_CLUSTER_NAME {:?} is not a valid cluster name",
                cluster_name
            )));
        }

        let etcd_endpoints: Vec<String> = optional("PROVISIONER_ETCD_ENDPOINTS", DEFAULT_ETCD_ENDPOINTS)
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if etcd_endpoints.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "PROVISIONER_ETCD_ENDPOINTS lists no endpoints".to_string(),
            ));
        }

        let lease_start = parse("PROVISIONER_LEASE_START", &required("PROVISIONER_LEASE_START")?)?;
        let lease_range: u32 = parse("PROVISIONER_LEASE_RANGE", &required("PROVISIONER_LEASE_RANGE")?)?;
        if lease_range <= 1 {
            return Err(ControllerError::InvalidConfig(
                "PROVISIONER_LEASE_RANGE must be greater than 1".to_string(),
            ));
        }

        let boot_assets = lookup("PROVISIONER_BOOT_ASSETS").map_or_else(|| workspace.join("boot"), PathBuf::from);

        Ok(Self {
            server_ip,
            server_mac,
            http_listen,
            workspace,
            cluster_name,
            etcd_endpoints,
            lease_start,
            lease_range,
            dns: lookup("PROVISIONER_DNS").is_none_or(|v| is_truthy(&v)),
            boot_assets,
            debug: lookup("PROVISIONER_DEBUG").is_some_and(|v| is_truthy(&v)),
        })
    }

    /// Addresses handed to templates and pxelinux configs.
    pub fn server_addrs(&self) -> ServerAddrs {
        let endpoints = self.etcd_endpoints.join(",");
        ServerAddrs {
            file_server_addr: format!("{}:{}", self.server_ip, pxe_server::http::HTTP_PORT),
            web_server_addr: format!("{}:{}", self.server_ip, self.http_listen.port()),
            etcd_endpoints: endpoints.clone(),
            etcd_ctl_endpoints: endpoints,
        }
    }
}
