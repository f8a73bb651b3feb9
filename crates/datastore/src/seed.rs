//! Bootstrap variables from `initial.yaml`.

use crate::error::DataStoreError;
use serde_yaml::Value;
use std::path::Path;

/// File name of the seed inside the workspace.
pub const INITIAL_FILE: &str = "initial.yaml";

/// Flatten a YAML document into `(relative key, value)` pairs.
///
/// Mappings nest with `/`, sequences use their index as the segment,
/// scalars are rendered as text and nulls are dropped.
pub fn flatten(document: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    walk(document, String::new(), &mut out);
    out
}

fn walk(value: &Value, path: String, out: &mut Vec<(String, String)>) {
    let child = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", path, segment)
        }
    };
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((path, b.to_string())),
        Value::Number(n) => out.push((path, n.to_string())),
        Value::String(s) => out.push((path, s.clone())),
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, child(&i.to_string()), out);
            }
        }
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = scalar_key(k) else {
                    continue;
                };
                walk(v, child(&key), out);
            }
        }
        Value::Tagged(tagged) => walk(&tagged.value, path, out),
    }
}

fn scalar_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read and flatten `<workspace>/initial.yaml`.
pub async fn read_seed(workspace: &Path) -> Result<Vec<(String, String)>, DataStoreError> {
    let path = workspace.join(INITIAL_FILE);
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| DataStoreError::Workspace(format!("failed to read {}: {}", path.display(), e)))?;
    let document: Value = serde_yaml::from_str(&text)
        .map_err(|e| DataStoreError::Workspace(format!("failed to parse {}: {}", path.display(), e)))?;
    if !matches!(document, Value::Mapping(_) | Value::Null) {
        return Err(DataStoreError::Workspace(format!(
            "{} must hold a mapping",
            path.display()
        )));
    }
    Ok(flatten(&document))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested() {
        let doc: Value = serde_yaml::from_str(
            r#"
coreos-version: "1068.2.0"
net-conf: '{"netmask":"255.255.255.0","router":"10.0.0.1"}'
ssh:
  keys:
    - ssh-rsa AAA
    - ssh-rsa BBB
  port: 22
empty: ~
"#,
        )
        .unwrap();
        let flat = flatten(&doc);
        assert!(flat.contains(&("coreos-version".to_string(), "1068.2.0".to_string())));
        assert!(flat.contains(&("ssh/keys/0".to_string(), "ssh-rsa AAA".to_string())));
        assert!(flat.contains(&("ssh/keys/1".to_string(), "ssh-rsa BBB".to_string())));
        assert!(flat.contains(&("ssh/port".to_string(), "22".to_string())));
        assert!(!flat.iter().any(|(k, _)| k == "empty"));
    }

    #[tokio::test]
    async fn test_read_seed_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read_seed(dir.path()).await, Err(DataStoreError::Workspace(_))));
    }

    #[tokio::test]
    async fn test_read_seed_rejects_scalar_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INITIAL_FILE), "just text").unwrap();
        assert!(read_seed(dir.path()).await.is_err());
    }
}
