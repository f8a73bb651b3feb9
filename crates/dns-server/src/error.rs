//! DNS server errors

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Datastore error: {0}")]
    DataStore(#[from] datastore::DataStoreError),

    #[error("Upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
