//! Template functions backed by the datastore and the workspace.

use crate::context::TemplateData;
use crate::error::TemplateError;
use crate::eval::FunctionHost;
use crate::value::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use datastore::{DataStore, DataStoreError, MacAddr};
use std::path::{Component, Path};
use std::sync::Arc;
use tracing::warn;

/// Variable lookups scoped to one machine.
pub struct MachineFunctions {
    datastore: Arc<DataStore>,
    mac: MacAddr,
    data: TemplateData,
}

impl std::fmt::Debug for MachineFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineFunctions").field("mac", &self.mac).finish_non_exhaustive()
    }
}

impl MachineFunctions {
    pub fn new(datastore: Arc<DataStore>, mac: MacAddr, data: TemplateData) -> Self {
        Self { datastore, mac, data }
    }

    async fn machine_variable(&self, mac: &MacAddr, key: &str) -> Result<String, DataStoreError> {
        Ok(self.datastore.get_machine_variable(mac, key).await?.unwrap_or_default())
    }

    async fn cluster_variable(&self, key: &str) -> Result<String, DataStoreError> {
        Ok(self.datastore.get_cluster_variable(key).await?.unwrap_or_default())
    }

    /// Dotted lookup: `cluster.<k>`, `machines.<mac>.<k>`, `me.<k>`, or a
    /// data field such as `Hostname`. `$Name` segments are substituted.
    async fn variable(&self, dotted: &str) -> Result<String, TemplateError> {
        let segments: Vec<String> = dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| self.substitute(s))
            .collect();
        let value = match segments.split_first() {
            None => String::new(),
            Some((first, rest)) if first == "cluster" && !rest.is_empty() => {
                self.cluster_variable(&rest.join("/")).await?
            }
            Some((first, rest)) if first == "me" && !rest.is_empty() => {
                self.machine_variable(&self.mac, &rest.join("/")).await?
            }
            Some((first, rest)) if first == "machines" && rest.len() >= 2 => {
                let mac: MacAddr = rest[0]
                    .parse()
                    .map_err(|e: datastore::ParseMacError| TemplateError::Execute(e.to_string()))?;
                self.machine_variable(&mac, &rest[1..].join("/")).await?
            }
            Some((first, rest)) if rest.is_empty() && self.data.get(first).is_some() => {
                self.data.get(first).unwrap_or_default().to_string()
            }
            Some(_) => self.cluster_variable(&segments.join("/")).await?,
        };
        Ok(value)
    }

    fn substitute(&self, segment: &str) -> String {
        match segment.strip_prefix('$').and_then(|name| self.data.get(name)) {
            Some(value) => value.to_string(),
            None => segment.to_string(),
        }
    }

    async fn b64file(&self, relative: &str) -> Result<String, TemplateError> {
        let path = Path::new(relative);
        if path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(TemplateError::Execute(format!("path {:?} escapes the workspace", relative)));
        }
        let bytes = tokio::fs::read(self.datastore.workspace().join(path)).await?;
        Ok(STANDARD.encode(bytes))
    }

    async fn dispatch(&self, name: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
        let arg = args.first().map(ToString::to_string).unwrap_or_default();
        let result = match name {
            "machine_variable" => self
                .machine_variable(&self.mac, &arg)
                .await
                .map(Value::from)
                .map_err(TemplateError::from),
            "cluster_variable" => self.cluster_variable(&arg).await.map(Value::from).map_err(TemplateError::from),
            "array_variable" => self
                .datastore
                .array_variable(&arg)
                .await
                .map(Value::from)
                .map_err(TemplateError::from),
            "variable" => self.variable(&arg).await.map(Value::from),
            "b64file" => self.b64file(&arg).await.map(Value::from),
            _ => return None,
        };
        Some(result)
    }
}

#[async_trait::async_trait]
impl FunctionHost for MachineFunctions {
    async fn call(&self, name: &str, args: Vec<Value>) -> Option<Result<Value, TemplateError>> {
        let result = self.dispatch(name, &args).await?;
        // Lookup failures never abort a render.
        Some(Ok(result.unwrap_or_else(|e| {
            warn!("Template function {} failed for {}: {}", name, self.mac, e);
            match name {
                "array_variable" => Value::List(Vec::new()),
                _ => Value::from(""),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore::DataStoreConfig;
    use kv_client::MemoryStore;
    use std::net::Ipv4Addr;

    fn setup(workspace: &Path) -> (MemoryStore, Arc<DataStore>, MachineFunctions) {
        let store = MemoryStore::new();
        let ds = Arc::new(DataStore::new(
            Arc::new(store.clone()),
            DataStoreConfig {
                cluster_name: "c".to_string(),
                workspace: workspace.to_path_buf(),
                lease_start: Ipv4Addr::new(10, 0, 0, 1),
                lease_range: 10,
            },
        ));
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let data = TemplateData {
            mac: mac.to_string(),
            hostname: "node1".to_string(),
            ..Default::default()
        };
        let functions = MachineFunctions::new(ds.clone(), mac, data);
        (store, ds, functions)
    }

    async fn call(functions: &MachineFunctions, name: &str, arg: &str) -> Value {
        functions.call(name, vec![Value::from(arg)]).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_variable_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, ds, functions) = setup(dir.path());
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        ds.set_cluster_variable("ntp", "pool.ntp.org").await.unwrap();
        ds.set_cluster_variable("net/dns", "1.1.1.1").await.unwrap();
        ds.set_machine_variable(&mac, "role", "worker").await.unwrap();

        assert_eq!(call(&functions, "cluster_variable", "ntp").await, Value::from("pool.ntp.org"));
        assert_eq!(call(&functions, "machine_variable", "role").await, Value::from("worker"));
        assert_eq!(call(&functions, "variable", "cluster.net.dns").await, Value::from("1.1.1.1"));
        assert_eq!(call(&functions, "variable", "me.role").await, Value::from("worker"));
        assert_eq!(call(&functions, "variable", "machines.$Mac.role").await, Value::from("worker"));
        assert_eq!(call(&functions, "variable", "Hostname").await, Value::from("node1"));
        assert_eq!(call(&functions, "variable", "ntp").await, Value::from("pool.ntp.org"));
    }

    #[tokio::test]
    async fn test_array_variable() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, ds, functions) = setup(dir.path());
        ds.set_cluster_variable("keys/0", "a").await.unwrap();
        ds.set_cluster_variable("keys/1", "b").await.unwrap();
        assert_eq!(
            call(&functions, "array_variable", "keys").await,
            Value::from(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_failures_become_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, _ds, functions) = setup(dir.path());
        assert_eq!(call(&functions, "cluster_variable", "_hidden").await, Value::from(""));
        assert_eq!(call(&functions, "b64file", "missing.txt").await, Value::from(""));
        assert_eq!(call(&functions, "b64file", "../etc/passwd").await, Value::from(""));
        assert!(functions.call("nope", vec![]).await.is_none());
    }

    #[tokio::test]
    async fn test_b64file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("motd"), "hello").unwrap();
        let (_store, _ds, functions) = setup(dir.path());
        assert_eq!(call(&functions, "b64file", "motd").await, Value::from("aGVsbG8="));
    }
}
