//! Per-render data exposed to templates as `.Mac`, `.IP` and friends.

use crate::error::TemplateError;
use crate::value::Value;
use datastore::{DataStore, MacAddr};
use std::collections::BTreeMap;

/// Addresses that are the same for every machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerAddrs {
    /// `host:port` of the boot file server
    pub file_server_addr: String,
    /// `host:port` of the management HTTP server
    pub web_server_addr: String,
    pub etcd_endpoints: String,
    pub etcd_ctl_endpoints: String,
}

/// Machine and cluster facts for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData {
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    pub domain: String,
    pub file_server_addr: String,
    pub web_server_addr: String,
    pub etcd_endpoints: String,
    pub etcd_ctl_endpoints: String,
}

impl TemplateData {
    /// Facts about `mac` from the datastore. A machine without a record gets
    /// an empty `IP`.
    pub async fn for_machine(datastore: &DataStore, mac: &MacAddr, addrs: &ServerAddrs) -> Result<Self, TemplateError> {
        let ip = datastore
            .machine_record(mac, false)
            .await?
            .and_then(|record| record.ip)
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        Ok(Self {
            mac: mac.to_string(),
            ip,
            hostname: datastore.hostname(mac).await?,
            domain: datastore.cluster_name().to_string(),
            file_server_addr: addrs.file_server_addr.clone(),
            web_server_addr: addrs.web_server_addr.clone(),
            etcd_endpoints: addrs.etcd_endpoints.clone(),
            etcd_ctl_endpoints: addrs.etcd_ctl_endpoints.clone(),
        })
    }

    /// Field names visible to templates, paired with their values.
    pub fn fields(&self) -> [(&'static str, &str); 8] {
        [
            ("Mac", self.mac.as_str()),
            ("IP", self.ip.as_str()),
            ("Hostname", self.hostname.as_str()),
            ("Domain", self.domain.as_str()),
            ("FileServerAddr", self.file_server_addr.as_str()),
            ("WebServerAddr", self.web_server_addr.as_str()),
            ("EtcdEndpoints", self.etcd_endpoints.as_str()),
            ("EtcdCtlEndpoints", self.etcd_ctl_endpoints.as_str()),
        ]
    }

    /// Look up a field by its template name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields().into_iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    pub fn to_value(&self) -> Value {
        let map: BTreeMap<String, Value> = self
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect();
        Value::Map(map)
    }
}
