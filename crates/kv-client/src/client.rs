//! etcd v3 client
//!
//! Implements [`KvStore`] against the etcd v3 JSON gateway
//! (`/v3/kv/range`, `/v3/kv/put`, `/v3/kv/txn`, `/v3/lease/*`).

use crate::common::wire::{
    Compare, DeleteRangeRequest, DeleteRangeResponse, LeaseGrantRequest, LeaseGrantResponse,
    LeaseIdRequest, LeaseKeepAliveResponse, PutRequest, PutResponse, RangeRequest, RangeResponse,
    RequestOp, TxnRequest, TxnResponse, WireKeyValue,
};
use crate::common::{HttpClient, decode, encode};
use crate::error::StoreError;
use crate::kv_trait::KvStore;
use crate::models::{Consistency, KeyValue, LeaseId, LeaseState, prefix_range_end};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Key under which ordered inserts draw their sequence revision.
fn sequence_key(dir: &str) -> String {
    format!("{}~seq", dir.trim_end_matches('/'))
}

/// etcd client speaking the v3 JSON gateway
#[derive(Debug)]
pub struct EtcdClient {
    http: HttpClient,
}

impl EtcdClient {
    /// Create a new etcd client
    ///
    /// # Arguments
    /// * `endpoints` - etcd client URLs (e.g., "http://127.0.0.1:2379")
    pub fn new(endpoints: Vec<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, endpoints)?,
        })
    }

    /// Check connectivity by reading a key that need not exist.
    pub async fn validate_connection(&self) -> Result<(), StoreError> {
        debug!("Validating store connectivity");
        self.get("health", Consistency::Linearizable).await.map(|_| ())
    }

    fn convert(kv: WireKeyValue) -> Result<KeyValue, StoreError> {
        Ok(KeyValue {
            key: decode(&kv.key)?,
            value: decode(&kv.value)?,
            create_revision: kv.create_revision,
            mod_revision: kv.mod_revision,
            lease: (kv.lease != 0).then_some(LeaseId(kv.lease)),
        })
    }

    async fn range(
        &self,
        key: &str,
        range_end: Option<Vec<u8>>,
        consistency: Consistency,
    ) -> Result<Vec<KeyValue>, StoreError> {
        let sorted = range_end.is_some();
        let request = RangeRequest {
            key: encode(key.as_bytes()),
            range_end: range_end.map(|end| encode(&end)),
            sort_order: sorted.then_some("ASCEND"),
            sort_target: sorted.then_some("KEY"),
            serializable: consistency == Consistency::Serializable,
        };
        let response: RangeResponse = self.http.post("/v3/kv/range", &request).await?;
        response.kvs.into_iter().map(Self::convert).collect()
    }

    async fn put_request(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<i64, StoreError> {
        let request = PutRequest {
            key: encode(key.as_bytes()),
            value: encode(value.as_bytes()),
            lease: lease.map(|l| l.0.to_string()),
        };
        let response: PutResponse = self.http.post("/v3/kv/put", &request).await?;
        Ok(response.header.revision)
    }
}

#[async_trait::async_trait]
impl KvStore for EtcdClient {
    fn endpoints(&self) -> Vec<String> {
        self.http.endpoints().to_vec()
    }

    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<KeyValue>, StoreError> {
        Ok(self.range(key, None, consistency).await?.into_iter().next())
    }

    async fn list(&self, prefix: &str, consistency: Consistency) -> Result<Vec<KeyValue>, StoreError> {
        let end = prefix_range_end(prefix.as_bytes());
        self.range(prefix, Some(end), consistency).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        self.put_request(key, value, None).await
    }

    async fn put_with_lease(&self, key: &str, value: &str, lease: LeaseId) -> Result<i64, StoreError> {
        self.put_request(key, value, Some(lease)).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_mod_revision: Option<i64>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let compare = match expected_mod_revision {
            Some(revision) => Compare {
                key: encode(key.as_bytes()),
                target: "MOD",
                result: "EQUAL",
                mod_revision: Some(revision.to_string()),
                create_revision: None,
            },
            None => Compare {
                key: encode(key.as_bytes()),
                target: "CREATE",
                result: "EQUAL",
                mod_revision: None,
                create_revision: Some("0".to_string()),
            },
        };
        let request = TxnRequest {
            compare: vec![compare],
            success: vec![RequestOp {
                request_put: PutRequest {
                    key: encode(key.as_bytes()),
                    value: encode(value.as_bytes()),
                    lease: None,
                },
            }],
            failure: Vec::new(),
        };
        let response: TxnResponse = self.http.post("/v3/kv/txn", &request).await?;
        Ok(response.succeeded)
    }

    async fn create_in_order(&self, dir: &str, value: &str, lease: LeaseId) -> Result<String, StoreError> {
        // revisions are cluster-wide and strictly increasing, so a zero-padded
        // revision sorts in creation order
        let revision = self.put_request(&sequence_key(dir), "", None).await?;
        let key = format!("{}/{:020}", dir.trim_end_matches('/'), revision);
        self.put_request(&key, value, Some(lease)).await?;
        Ok(key)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let request = DeleteRangeRequest {
            key: encode(key.as_bytes()),
            range_end: None,
        };
        let response: DeleteRangeResponse = self.http.post("/v3/kv/deleterange", &request).await?;
        Ok(response.deleted > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let request = DeleteRangeRequest {
            key: encode(prefix.as_bytes()),
            range_end: Some(encode(&prefix_range_end(prefix.as_bytes()))),
        };
        let response: DeleteRangeResponse = self.http.post("/v3/kv/deleterange", &request).await?;
        Ok(u64::try_from(response.deleted).unwrap_or(0))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let request = LeaseGrantRequest {
            ttl: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        };
        let response: LeaseGrantResponse = self.http.post("/v3/lease/grant", &request).await?;
        if !response.error.is_empty() || response.id == 0 {
            return Err(StoreError::Api(format!("lease grant failed: {}", response.error)));
        }
        Ok(LeaseId(response.id))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<LeaseState, StoreError> {
        let request = LeaseIdRequest { id: lease.0 };
        let response: LeaseKeepAliveResponse = self.http.post("/v3/lease/keepalive", &request).await?;
        Ok(match response.result {
            Some(result) if result.ttl > 0 => {
                LeaseState::Alive(Duration::from_secs(result.ttl.unsigned_abs()))
            }
            _ => LeaseState::Expired,
        })
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        let request = LeaseIdRequest { id: lease.0 };
        let _: serde_json::Value = self.http.post("/v3/lease/revoke", &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_key() {
        assert_eq!(sequence_key("c/instances"), "c/instances~seq");
        assert_eq!(sequence_key("c/instances/"), "c/instances~seq");
    }

    #[test]
    fn test_ordered_keys_sort_by_revision() {
        let a = format!("c/instances/{:020}", 9);
        let b = format!("c/instances/{:020}", 10);
        assert!(a < b);
    }
}
