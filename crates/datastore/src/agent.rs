//! Agent heartbeat and command models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Machine variable holding the last heartbeat.
pub const HEARTBEAT: &str = "_agent/heartbeat";
/// Key, relative to the machine directory, the agent watches for commands.
pub const COMMAND: &str = "agent/command";

/// Heartbeat posted by a provisioned machine's agent.
///
/// Both agent generations post this; fields the newer one adds are accepted
/// and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentHeartbeat {
    pub status: String,
    pub message: String,
    pub time: String,
    pub age: i64,
}

/// A command for the agent to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCommand {
    Reboot,
    Update,
}

impl AgentCommand {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AgentCommand::Reboot => "reboot",
            AgentCommand::Update => "update",
        }
    }
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected command name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for AgentCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reboot" => Ok(AgentCommand::Reboot),
            "update" => Ok(AgentCommand::Update),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_ignores_unknown_fields() {
        let body = r#"{"status":"ok","message":"up","time":"now","age":3,"cert":"---","key":"---"}"#;
        let hb: AgentHeartbeat = serde_json::from_str(body).unwrap();
        assert_eq!(hb.status, "ok");
        assert_eq!(hb.age, 3);
    }

    #[test]
    fn test_heartbeat_partial_payload() {
        let hb: AgentHeartbeat = serde_json::from_str(r#"{"status":"booting"}"#).unwrap();
        assert_eq!(hb.status, "booting");
        assert_eq!(hb.age, 0);
    }

    #[test]
    fn test_command_parse() {
        assert_eq!("reboot".parse::<AgentCommand>().unwrap(), AgentCommand::Reboot);
        assert_eq!(" update ".parse::<AgentCommand>().unwrap(), AgentCommand::Update);
        assert!("format".parse::<AgentCommand>().is_err());
    }
}
