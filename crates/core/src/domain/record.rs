use serde::{Deserialize, Serialize};

/// Status carried by a `state` record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Running,
    Complete,
    /// Phase work returned an error
    Failed,
    /// A `cancel` command interrupted the phase
    Cancelled,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Record published on the `state` subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StateEvent {
    #[serde(rename = "phaseId")]
    pub phase_id: String,
    pub status: PhaseStatus,
    /// RFC 3339 UTC timestamp
    pub updated: String,
}

/// Record published on the `log` subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct LogEvent {
    #[serde(rename = "phaseId", default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    /// RFC 3339 UTC timestamp
    pub timestamp: String,
}
