//! JSON shapes of the etcd v3 gateway.
//!
//! The gateway renders 64-bit integers as strings and omits zero values, so
//! every numeric field goes through [`int64`] and defaults to zero.

use serde::{Deserialize, Serialize};

pub mod int64 {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::Number(n) => Ok(n),
            StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    #[allow(clippy::trivially_copy_pass_by_ref, reason = "serde serialize_with signature")]
    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseHeader {
    #[serde(default, with = "int64")]
    pub revision: i64,
}

#[derive(Debug, Deserialize)]
pub struct WireKeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, with = "int64")]
    pub create_revision: i64,
    #[serde(default, with = "int64")]
    pub mod_revision: i64,
    #[serde(default, with = "int64")]
    pub lease: i64,
}

#[derive(Debug, Serialize)]
pub struct RangeRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_target: Option<&'static str>,
    pub serializable: bool,
}

#[derive(Debug, Deserialize)]
pub struct RangeResponse {
    #[serde(default)]
    pub kvs: Vec<WireKeyValue>,
}

#[derive(Debug, Serialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PutResponse {
    #[serde(default)]
    pub header: ResponseHeader,
}

#[derive(Debug, Serialize)]
pub struct DeleteRangeRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRangeResponse {
    #[serde(default, with = "int64")]
    pub deleted: i64,
}

#[derive(Debug, Serialize)]
pub struct Compare {
    pub key: String,
    pub target: &'static str,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_revision: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestOp {
    pub request_put: PutRequest,
}

#[derive(Debug, Serialize)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<RequestOp>,
    pub failure: Vec<RequestOp>,
}

#[derive(Debug, Deserialize)]
pub struct TxnResponse {
    #[serde(default)]
    pub succeeded: bool,
}

#[derive(Debug, Serialize)]
pub struct LeaseGrantRequest {
    #[serde(rename = "TTL", with = "int64")]
    pub ttl: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaseGrantResponse {
    #[serde(rename = "ID", default, with = "int64")]
    pub id: i64,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct LeaseIdRequest {
    #[serde(rename = "ID", with = "int64")]
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaseKeepAliveResult {
    #[serde(rename = "TTL", default, with = "int64")]
    pub ttl: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaseKeepAliveResponse {
    pub result: Option<LeaseKeepAliveResult>,
}
