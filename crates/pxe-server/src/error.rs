//! PXE server errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PxeError {
    #[error("DHCP error: {0}")]
    Dhcp(String),

    #[error("TFTP error: {0}")]
    Tftp(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Datastore error: {0}")]
    DataStore(#[from] datastore::DataStoreError),

    #[error("Lease error: {0}")]
    Lease(#[from] datastore::LeaseError),

    #[error("Template error: {0}")]
    Template(#[from] templating::TemplateError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<dhcproto::error::DecodeError> for PxeError {
    fn from(e: dhcproto::error::DecodeError) -> Self {
        PxeError::Dhcp(format!("decode: {}", e))
    }
}

impl From<dhcproto::error::EncodeError> for PxeError {
    fn from(e: dhcproto::error::EncodeError) -> Self {
        PxeError::Dhcp(format!("encode: {}", e))
    }
}
