//! PXE Boot Server
//!
//! Everything a machine needs to network-boot, in Rust on top of `dhcproto`,
//! `async-tftp` and `axum`:
//!
//! - DHCP on port 67, leasing from the cluster-wide pool and steering PXE
//!   ROMs to the boot server
//! - Proxy-DHCP on port 4011, chainloading pxelinux and pointing it at HTTP
//! - TFTP on port 69, serving the pxelinux chainloader
//! - HTTP on port 70, serving `ldlinux.c32`, per-machine pxelinux configs and
//!   kernel/initrd images
//!
//! Only the elected master runs these; [`BootServers`] starts and stops them
//! as a unit.

pub mod assets;
pub mod dhcp;
pub mod error;
pub mod http;
pub mod metrics;
pub mod options;
pub mod pxe;
pub mod server;
pub mod tftp;

pub use assets::BootAssets;
pub use error::PxeError;
pub use metrics::BootMetrics;
pub use server::{BootConfig, BootServers};
