//! Controller-specific error types.

use thiserror::Error;

/// Errors that stop the provisioner.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Coordination store error
    #[error("Store error: {0}")]
    Store(#[from] kv_client::StoreError),

    /// Datastore error
    #[error("Datastore error: {0}")]
    DataStore(#[from] datastore::DataStoreError),

    /// Election error
    #[error("Election error: {0}")]
    Election(#[from] datastore::ElectionError),

    /// Template repository error
    #[error("Template error: {0}")]
    Template(#[from] templating::TemplateError),

    /// Boot server error
    #[error("Boot server error: {0}")]
    Boot(#[from] pxe_server::PxeError),

    /// DNS server error
    #[error("DNS error: {0}")]
    Dns(#[from] dns_server::DnsError),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A long-running task stopped
    #[error("Task failed: {0}")]
    Task(String),
}
