//! Cloud-config schema check, reported as comments appended to the document.

use crate::merge::CLOUD_CONFIG_HEADER;
use serde_yaml::{Mapping, Value};
use std::fmt;

const KNOWN_KEYS: [&str; 9] = [
    "coreos",
    "hostname",
    "manage_etc_hosts",
    "ssh_authorized_keys",
    "users",
    "write_files",
    "runcmd",
    "packages",
    "bootcmd",
];

const KNOWN_ENCODINGS: [&str; 6] = ["", "base64", "b64", "gz", "gzip", "gz+base64"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub line: usize,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.severity, self.message)
    }
}

/// Check a rendered cloud-config.
pub fn validate(text: &str) -> Vec<Entry> {
    let mut report = Report { text, entries: Vec::new() };

    if text.lines().next().map(str::trim_end) != Some(CLOUD_CONFIG_HEADER) {
        report.push(1, Severity::Error, format!("must begin with \"{}\"", CLOUD_CONFIG_HEADER));
    }

    let root = match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Mapping(map)) => map,
        Ok(Value::Null) => return report.entries,
        Ok(_) => {
            report.push(1, Severity::Error, "document must be a mapping".to_string());
            return report.entries;
        }
        Err(e) => {
            let line = e.location().map_or(1, |l| l.line());
            report.push(line, Severity::Error, e.to_string());
            return report.entries;
        }
    };

    report.check_root(&root);
    report.entries
}

/// Append `entries` as `#` comment lines.
pub fn append_report(document: &str, entries: &[Entry]) -> String {
    if entries.is_empty() {
        return document.to_string();
    }
    let mut out = String::from(document);
    out.push('\n');
    for entry in entries {
        out.push_str(&format!("# {}\n", entry));
    }
    out
}

struct Report<'a> {
    text: &'a str,
    entries: Vec<Entry>,
}

impl Report<'_> {
    fn push(&mut self, line: usize, severity: Severity, message: String) {
        self.entries.push(Entry { line, severity, message });
    }

    /// Best-effort line of the first `key:` occurrence.
    fn line_of(&self, key: &str) -> usize {
        let needle = format!("{}:", key);
        self.text
            .lines()
            .position(|l| {
                let l = l.trim_start().trim_start_matches("- ");
                l.starts_with(&needle)
            })
            .map_or(1, |i| i + 1)
    }

    fn check_root(&mut self, root: &Mapping) {
        for (key, value) in root {
            let Some(key) = key.as_str() else {
                self.push(1, Severity::Error, "non-string top-level key".to_string());
                continue;
            };
            match key {
                "hostname" => self.expect_string(key, value),
                "manage_etc_hosts" => {
                    if value.as_str() != Some("localhost") {
                        self.push(
                            self.line_of(key),
                            Severity::Warning,
                            "manage_etc_hosts only supports \"localhost\"".to_string(),
                        );
                    }
                }
                "ssh_authorized_keys" => self.expect_strings(key, value),
                "write_files" => self.check_list(key, value, Self::check_write_file),
                "users" => self.check_list(key, value, Self::check_user),
                "coreos" => self.check_coreos(value),
                _ if KNOWN_KEYS.contains(&key) => {}
                _ => self.push(self.line_of(key), Severity::Warning, format!("unrecognized key \"{}\"", key)),
            }
        }
    }

    fn expect_string(&mut self, key: &str, value: &Value) {
        if !value.is_string() {
            self.push(self.line_of(key), Severity::Error, format!("\"{}\" must be a string", key));
        }
    }

    fn expect_strings(&mut self, key: &str, value: &Value) {
        let ok = value.as_sequence().is_some_and(|s| s.iter().all(Value::is_string));
        if !ok {
            self.push(self.line_of(key), Severity::Error, format!("\"{}\" must be a list of strings", key));
        }
    }

    fn check_list(&mut self, key: &str, value: &Value, check: fn(&mut Self, &Mapping)) {
        let Some(items) = value.as_sequence() else {
            self.push(self.line_of(key), Severity::Error, format!("\"{}\" must be a list", key));
            return;
        };
        for item in items {
            match item.as_mapping() {
                Some(map) => check(self, map),
                None => self.push(self.line_of(key), Severity::Error, format!("\"{}\" entries must be mappings", key)),
            }
        }
    }

    fn check_write_file(&mut self, file: &Mapping) {
        match file.get("path").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => {}
            _ => self.push(self.line_of("write_files"), Severity::Error, "write_files entry without a path".to_string()),
        }
        if let Some(permissions) = file.get("permissions") {
            let valid = match permissions {
                Value::String(s) => !s.is_empty() && s.chars().all(|c| ('0'..='7').contains(&c)),
                Value::Number(n) => n.is_u64(),
                _ => false,
            };
            if !valid {
                self.push(self.line_of("permissions"), Severity::Error, "permissions must be an octal mode".to_string());
            }
        }
        if let Some(encoding) = file.get("encoding") {
            if !encoding.as_str().is_some_and(|e| KNOWN_ENCODINGS.contains(&e)) {
                self.push(self.line_of("encoding"), Severity::Error, "unknown write_files encoding".to_string());
            }
        }
    }

    fn check_user(&mut self, user: &Mapping) {
        if !user.get("name").is_some_and(Value::is_string) {
            self.push(self.line_of("users"), Severity::Error, "users entry without a name".to_string());
        }
    }

    fn check_coreos(&mut self, value: &Value) {
        let Some(coreos) = value.as_mapping() else {
            self.push(self.line_of("coreos"), Severity::Error, "\"coreos\" must be a mapping".to_string());
            return;
        };
        let Some(units) = coreos.get("units") else {
            return;
        };
        self.check_list("units", units, |report, unit| {
            if !unit.get("name").is_some_and(|n| n.is_string() || n.is_number()) {
                report.push(report.line_of("units"), Severity::Error, "unit without a name".to_string());
            }
            if let Some(command) = unit.get("command") {
                let known = ["start", "stop", "restart", "reload", "try-restart", "reload-or-restart", "reload-or-try-restart"];
                if !command.as_str().is_some_and(|c| known.contains(&c)) {
                    report.push(report.line_of("command"), Severity::Error, "unknown unit command".to_string());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_document() {
        let text = "#cloud-config\nhostname: node1\nssh_authorized_keys:\n  - ssh-rsa AAA\ncoreos:\n  units:\n    - name: etcd2.service\n      command: start\n";
        assert!(validate(text).is_empty());
    }

    #[test]
    fn test_missing_header() {
        let entries = validate("hostname: a\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].line, 1);
        assert_eq!(entries[0].severity, Severity::Error);
    }

    #[test]
    fn test_unknown_key_is_warning_on_its_line() {
        let entries = validate("#cloud-config\nhostname: a\nfoo: bar\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert_eq!(entries[0].to_string(), "line 3: warning: unrecognized key \"foo\"");
    }

    #[test]
    fn test_type_errors() {
        let text = "#cloud-config\nhostname: [a]\nwrite_files:\n  - path: /a\n    permissions: \"0999\"\n    encoding: rot13\ncoreos:\n  units:\n    - command: launch\n";
        let messages: Vec<String> = validate(text).into_iter().map(|e| e.message).collect();
        assert!(messages.contains(&"\"hostname\" must be a string".to_string()));
        assert!(messages.contains(&"permissions must be an octal mode".to_string()));
        assert!(messages.contains(&"unknown write_files encoding".to_string()));
        assert!(messages.contains(&"unit without a name".to_string()));
        assert!(messages.contains(&"unknown unit command".to_string()));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let entries = validate("#cloud-config\nhostname: a\n  bad: [\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Error);
        assert!(entries[0].line >= 2);
    }

    #[test]
    fn test_append_report() {
        let entries = validate("#cloud-config\nfoo: 1\n");
        let out = append_report("#cloud-config\nfoo: 1\n", &entries);
        assert_eq!(out, "#cloud-config\nfoo: 1\n\n# line 2: warning: unrecognized key \"foo\"\n");
        assert_eq!(append_report("x", &[]), "x");
    }
}
