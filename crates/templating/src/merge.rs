//! Structural merge of a base and a user cloud-config.
//!
//! - `coreos.units`, `write_files` and `users` merge by `name`, `path` and
//!   `name`; a user entry replaces the base entry with the same key, the
//!   remaining user entries follow the base ones.
//! - `coreos.{etcd,etcd2,flannel,fleet,locksmith,oem,update}` are replaced
//!   whole by a non-empty user section.
//! - `hostname` and `manage_etc_hosts` take the user value when non-empty.
//! - `ssh_authorized_keys` concatenates base then user.
//!
//! Any other user key is kept only when the base lacks it.

use crate::error::TemplateError;
use serde_yaml::{Mapping, Value};

/// First line of every cloud-config document.
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

const WHOLE_SECTIONS: [&str; 7] = ["etcd", "etcd2", "flannel", "fleet", "locksmith", "oem", "update"];

/// Merge two rendered cloud-configs into one document.
pub fn merge_cloud_config(base: &str, user: &str) -> Result<String, TemplateError> {
    if user.trim().is_empty() {
        return Ok(base.to_string());
    }
    let merged = merge(&parse_mapping(base)?, &parse_mapping(user)?);
    let body = serde_yaml::to_string(&Value::Mapping(merged))?;
    Ok(format!("{}\n{}", CLOUD_CONFIG_HEADER, body))
}

fn parse_mapping(text: &str) -> Result<Mapping, TemplateError> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        other => Err(TemplateError::Execute(format!(
            "cloud-config must be a mapping, found {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Whether a section counts as set.
fn is_zero(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Mapping(m)) => m.values().all(|v| is_zero(Some(v))),
        Some(Value::Sequence(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn merge(base: &Mapping, user: &Mapping) -> Mapping {
    let mut out = base.clone();

    let base_coreos = base.get("coreos").and_then(Value::as_mapping);
    let user_coreos = user.get("coreos").and_then(Value::as_mapping);
    if base_coreos.is_some() || user_coreos.is_some() {
        let empty = Mapping::new();
        let coreos = merge_coreos(base_coreos.unwrap_or(&empty), user_coreos.unwrap_or(&empty));
        out.insert("coreos".into(), Value::Mapping(coreos));
    }

    for (key, natural) in [("write_files", "path"), ("users", "name")] {
        if let Some(merged) = merge_keyed(base.get(key), user.get(key), natural) {
            out.insert(key.into(), merged);
        }
    }

    for key in ["hostname", "manage_etc_hosts"] {
        if !is_zero(user.get(key)) {
            if let Some(value) = user.get(key) {
                out.insert(key.into(), value.clone());
            }
        }
    }

    let keys: Vec<Value> = sequence(base.get("ssh_authorized_keys"))
        .iter()
        .chain(sequence(user.get("ssh_authorized_keys")))
        .cloned()
        .collect();
    if !keys.is_empty() {
        out.insert("ssh_authorized_keys".into(), Value::Sequence(keys));
    }

    for (key, value) in user {
        if !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

fn merge_coreos(base: &Mapping, user: &Mapping) -> Mapping {
    let mut out = base.clone();
    for section in WHOLE_SECTIONS {
        if !is_zero(user.get(section)) {
            if let Some(value) = user.get(section) {
                out.insert(section.into(), value.clone());
            }
        }
    }
    if let Some(units) = merge_keyed(base.get("units"), user.get("units"), "name") {
        out.insert("units".into(), units);
    }
    for (key, value) in user {
        if !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

fn sequence(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_sequence).map_or(&[], Vec::as_slice)
}

/// Merge two lists of mappings on `natural`. `None` when both are absent.
fn merge_keyed(base: Option<&Value>, user: Option<&Value>, natural: &str) -> Option<Value> {
    if base.is_none() && user.is_none() {
        return None;
    }
    let mut remaining: Vec<Value> = sequence(user).to_vec();
    let mut out = Vec::with_capacity(remaining.len() + sequence(base).len());
    for item in sequence(base) {
        let id = item.get(natural);
        match remaining.iter().position(|u| u.get(natural) == id) {
            Some(j) => out.push(remaining.remove(j)),
            None => out.push(item.clone()),
        }
    }
    out.extend(remaining);
    Some(Value::Sequence(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
#cloud-config
coreos:
  update:
    reboot-strategy: etcd-lock
  units:
    - name: 1
    - name: etcd2.service
      command: start
    - name: docker.service
      drop-ins:
        - name: 50-insecure-registry.conf
          content: |
            [Service]
            Environment=DOCKER_OPTS=--insecure-registry=localhost:5000
write_files:
  - path: /var/lib/provisioner/workspace-updater.sh
    encoding: "base64"
    permissions: "0774"
    owner: "root"
    content: IyEvdXNyL2...
  - path: /tmp/provisioner-agent.sh
    encoding: "base64"
    permissions: "0744"
    owner: "root"
    content: IyEvYmluL2...
"#;

    const USER: &str = r#"
#cloud-config
coreos:
  update:
    reboot-strategy: etcd-lock
  units:
    # Some comment
    - name: 2
    - name: etcd2.service
      command: start
    - name: docker.service
      drop-ins:
        - name: 50-insecure-registry.conf
          content: |
            [Service]
            Environment=DOCKER_OPTS=--insecure-registry=172.20.0.1:5000
write_files:
  - path: /var/lib/provisioner/workspace-updater.sh
    encoding: "base64"
    permissions: "0774"
    owner: "root"
    content: IyEvdXNyL2...
  - path: /tmp/provisioner-bootstrapper.sh
    encoding: "base64"
    permissions: "0744"
    owner: "root"
    content: IyEvYmluL2...
  - path: /var/lib/provisioner/workspaces/initial.yaml
    encoding: "base64"
    permissions: "0744"
    owner: "root"
    content: Y2x1c3Rlci...
ssh_authorized_keys:
  - ssh-rsa AAAAB3NzaC1yc2EAAAA... alice@workstation
  - ssh-rsa AAAAB3NzaC1yc2EAAAA... bob@laptop
"#;

    const WANT: &str = r#"
#cloud-config
coreos:
  update:
    reboot-strategy: etcd-lock
  units:
    - name: 1
    - name: etcd2.service
      command: start
    - name: docker.service
      drop-ins:
        - name: 50-insecure-registry.conf
          content: |
            [Service]
            Environment=DOCKER_OPTS=--insecure-registry=172.20.0.1:5000
    - name: 2
write_files:
  - path: /var/lib/provisioner/workspace-updater.sh
    encoding: "base64"
    permissions: "0774"
    owner: "root"
    content: IyEvdXNyL2...
  - path: /tmp/provisioner-agent.sh
    encoding: "base64"
    permissions: "0744"
    owner: "root"
    content: IyEvYmluL2...
  - path: /tmp/provisioner-bootstrapper.sh
    encoding: "base64"
    permissions: "0744"
    owner: "root"
    content: IyEvYmluL2...
  - path: /var/lib/provisioner/workspaces/initial.yaml
    encoding: "base64"
    permissions: "0744"
    owner: "root"
    content: Y2x1c3Rlci...
ssh_authorized_keys:
  - ssh-rsa AAAAB3NzaC1yc2EAAAA... alice@workstation
  - ssh-rsa AAAAB3NzaC1yc2EAAAA... bob@laptop
"#;

    #[test]
    fn test_merge_fixture() {
        let merged = merge_cloud_config(BASE, USER).unwrap();
        assert!(merged.starts_with("#cloud-config\n"));
        let got: Value = serde_yaml::from_str(&merged).unwrap();
        let want: Value = serde_yaml::from_str(WANT).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_merged_order_follows_base() {
        let merged = merge_cloud_config(BASE, USER).unwrap();
        let got: Value = serde_yaml::from_str(&merged).unwrap();
        let names: Vec<String> = got["coreos"]["units"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|u| match &u["name"] {
                Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other).unwrap().trim().to_string(),
            })
            .collect();
        assert_eq!(names, vec!["1", "etcd2.service", "docker.service", "2"]);
    }

    #[test]
    fn test_scalars_and_sections() {
        let base = "#cloud-config\nhostname: base\nmanage_etc_hosts: localhost\ncoreos:\n  etcd2:\n    name: a\n  fleet:\n    metadata: x\n";
        let user = "#cloud-config\nhostname: \"\"\ncoreos:\n  etcd2:\n    name: b\n  fleet: {}\nruncmd: [x]\n";
        let merged: Value = serde_yaml::from_str(&merge_cloud_config(base, user).unwrap()).unwrap();
        assert_eq!(merged["hostname"], Value::from("base"));
        assert_eq!(merged["manage_etc_hosts"], Value::from("localhost"));
        assert_eq!(merged["coreos"]["etcd2"]["name"], Value::from("b"));
        assert_eq!(merged["coreos"]["fleet"]["metadata"], Value::from("x"));
        assert_eq!(merged["runcmd"][0], Value::from("x"));
    }

    #[test]
    fn test_empty_user_keeps_base_verbatim() {
        assert_eq!(merge_cloud_config(BASE, "\n").unwrap(), BASE);
    }

    #[test]
    fn test_non_mapping_is_rejected() {
        assert!(merge_cloud_config("#cloud-config\nhostname: a\n", "- a\n- b\n").is_err());
    }
}
