use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use events::DEFAULT_NATS_URL;
use peer::{AdmissionPolicy, PeerConfig, RetryPolicy, DEFAULT_PACING, DEFAULT_QUEUE_CAPACITY};
use peer_core::SessionId;
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = "plan-peer";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub peer: PeerSection,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Generated at startup when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSection {
    pub pacing_ms: u64,
    pub admission: AdmissionPolicy,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_string(),
        }
    }
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            pacing_ms: DEFAULT_PACING.as_millis() as u64,
            admission: AdmissionPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: retry.max_backoff.as_millis() as u64,
        }
    }
}

/// Values given on the command line; each one overrides the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub nats_url: Option<String>,
    pub session_id: Option<String>,
    pub pacing_ms: Option<u64>,
    pub admission: Option<AdmissionPolicy>,
}

/// Fully resolved settings for `plan-peer run`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub nats_url: String,
    pub peer: PeerConfig,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    pub fn resolve(self, overrides: Overrides) -> Result<RunSettings> {
        let session_id = match overrides.session_id.or(self.session.id) {
            Some(id) => SessionId::new(id).context("Invalid session id")?,
            None => SessionId::generate(),
        };

        let retry = RetryPolicy {
            max_attempts: self.publish.max_attempts,
            initial_backoff: Duration::from_millis(self.publish.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.publish.max_backoff_ms),
        };
        let peer = PeerConfig::new(session_id)
            .with_pacing(Duration::from_millis(
                overrides.pacing_ms.unwrap_or(self.peer.pacing_ms),
            ))
            .with_admission(overrides.admission.unwrap_or(self.peer.admission))
            .with_queue_capacity(self.peer.queue_capacity)
            .with_retry(retry);
        peer.validate().context("Invalid peer configuration")?;

        Ok(RunSettings {
            nats_url: overrides.nats_url.unwrap_or(self.broker.url),
            peer,
        })
    }
}
