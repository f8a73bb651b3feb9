//! Datastore errors

use crate::variables::ValidationError;
use kv_client::StoreError;
use thiserror::Error;

/// Errors from the typed datastore façade.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// Coordination store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Variable rejected by the naming rules
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lease pool error
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    /// Instance directory error
    #[error("Election error: {0}")]
    Election(#[from] ElectionError),

    /// Stored data could not be decoded
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Workspace content is missing or malformed
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the DHCP lease pool.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// No free or expired address left, or too many write conflicts
    #[error("lease pool is exhausted")]
    PoolExhausted,

    /// The request cannot be granted; answer with a NAK
    #[error("no matching lease for {nic} at {ip}")]
    NoMatch { nic: String, ip: std::net::Ipv4Addr },

    /// Coordination store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from instance registration and election.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// The instance key is gone; register again on the next tick
    #[error("instance is not registered")]
    NotRegistered,

    /// Coordination store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
