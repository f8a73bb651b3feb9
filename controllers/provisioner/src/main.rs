//! Provisioner
//!
//! Bare-metal provisioning control plane. Every replica serves the
//! management API and cluster DNS; the elected master additionally runs the
//! DHCP, proxy-DHCP, TFTP and boot HTTP servers that network-boot machines.
//!
//! Configuration comes from `PROVISIONER_*` environment variables.

mod config;
mod controller;
mod error;
mod metrics;
mod web;
mod workspace;

use crate::config::{COMMIT, Config, VERSION, is_truthy};
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let debug = std::env::var("PROVISIONER_DEBUG").is_ok_and(|v| is_truthy(&v));
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("Starting provisioner {} ({})", VERSION, COMMIT);

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Server: {} ({})", config.server_ip, config.server_mac);
    info!("  Cluster: {}", config.cluster_name);
    info!("  Workspace: {}", config.workspace.display());
    info!("  Store: {}", config.etcd_endpoints.join(","));
    info!(
        "  Lease pool: {} addresses from {}",
        config.lease_range, config.lease_start
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
