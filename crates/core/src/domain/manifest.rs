use serde::{Deserialize, Serialize};

/// Placeholder narrated for phases without a description.
pub const NO_DESCRIPTION: &str = "No description";

/// Payload of the `start` subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StartMessage {
    #[serde(default)]
    pub manifest: Vec<Phase>,
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

impl StartMessage {
    pub fn new(manifest: Vec<Phase>) -> Self {
        Self {
            manifest,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// One phase descriptor of a manifest.
///
/// Every field is optional on the wire; fields other than these are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Phase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PhaseSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PhaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Phase {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            spec: Some(PhaseSpec {
                description: Some(description.into()),
            }),
        }
    }

    /// The phase id, or the positional fallback `phase-<index>`.
    pub fn resolved_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("phase-{}", index))
    }

    pub fn description(&self) -> &str {
        self.spec
            .as_ref()
            .and_then(|spec| spec.description.as_deref())
            .unwrap_or(NO_DESCRIPTION)
    }
}
