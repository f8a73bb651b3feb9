//! Cluster DNS
//!
//! Authoritative answers for the cluster zone, backed by the machine records
//! in the coordination store:
//!
//! - `<hostname>.<cluster>.` resolves to the machine's leased address
//! - `master.<cluster>.` rotates through the control-plane servers
//! - other names under the zone are NXDOMAIN
//!
//! Everything else is passed through to public resolvers. Every replica runs
//! the responder, regardless of election state.

pub mod error;
pub mod metrics;
pub mod server;
pub mod upstream;

pub use error::DnsError;
pub use metrics::{DnsMetrics, Outcome};
pub use server::{DNS_PORT, DnsHandle, DnsServer, start};
pub use upstream::{Forwarder, UdpForwarder};
