use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use peer_core::SessionId;
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

/// Simulated work duration of one phase.
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);
/// Starts that may wait behind the in-flight run under [`AdmissionPolicy::Queue`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// What to do with a `start` that arrives while a manifest is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Run it after the current manifest (and any queued before it) completes
    #[default]
    Queue,
    /// Refuse it with a warning on the log subject
    Reject,
}

impl AdmissionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdmissionPolicy {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(PeerError::Config(format!(
                "unknown admission policy '{}' (expected queue or reject)",
                other
            ))),
        }
    }
}

/// Backoff schedule for outbound publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): initial * 2^retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Configuration of one session peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub session_id: SessionId,
    /// Time each phase holds in `running` before completing
    pub pacing: Duration,
    pub admission: AdmissionPolicy,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl PeerConfig {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            pacing: DEFAULT_PACING,
            admission: AdmissionPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(PeerError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(PeerError::Config(
                "retry.initial_backoff must not exceed retry.max_backoff".to_string(),
            ));
        }
        Ok(())
    }

    /// Runs admitted at once: the in-flight run plus the waiting queue.
    pub fn admission_limit(&self) -> usize {
        match self.admission {
            AdmissionPolicy::Queue => 1 + self.queue_capacity,
            AdmissionPolicy::Reject => 1,
        }
    }
}

impl Default for PeerConfig {
    /// Configuration for a freshly generated session id.
    fn default() -> Self {
        Self::new(SessionId::generate())
    }
}
