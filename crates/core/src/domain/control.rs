use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name reported for control messages that carry no `command`.
pub const UNKNOWN_COMMAND: &str = "unknown";

/// Payload of the `control` subject: a command name plus arbitrary extra fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ControlMessage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            extra: Map::new(),
        }
    }

    pub fn command_name(&self) -> &str {
        self.command.as_deref().unwrap_or(UNKNOWN_COMMAND)
    }

    pub fn command(&self) -> ControlCommand {
        ControlCommand::parse(self.command_name())
    }
}

/// Control commands the peer enforces. Anything else is only acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Cancel,
    Other(String),
}

impl ControlCommand {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "cancel" => Self::Cancel,
            _ => Self::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
