//! Outbound `state` and `log` records for one session.

use std::sync::Arc;

use bytes::Bytes;
use events::Transport;
use peer_core::codec::{encode_log, encode_state};
use peer_core::{Clock, LogEvent, LogLevel, PhaseStatus, SessionSubjects, StateEvent};
use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::error::{PeerError, Result};

/// Publishes session records through the shared transport, retrying
/// transient failures with exponential backoff.
#[derive(Clone)]
pub struct SessionPublisher {
    transport: Arc<dyn Transport>,
    subjects: Arc<SessionSubjects>,
    clock: Clock,
    retry: RetryPolicy,
}

impl SessionPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        subjects: Arc<SessionSubjects>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            subjects,
            clock: Clock::new(),
            retry,
        }
    }

    pub fn subjects(&self) -> &SessionSubjects {
        &self.subjects
    }

    pub async fn publish_state(&self, phase_id: &str, status: PhaseStatus) -> Result<StateEvent> {
        let event = StateEvent {
            phase_id: phase_id.to_string(),
            status,
            updated: self.clock.timestamp(),
        };
        let payload = encode_state(&event)?;
        self.publish_with_retry(&self.subjects.state, Bytes::from(payload))
            .await?;
        Ok(event)
    }

    pub async fn publish_log(
        &self,
        phase_id: Option<&str>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<LogEvent> {
        let event = LogEvent {
            phase_id: phase_id.map(str::to_string),
            level,
            message: message.into(),
            timestamp: self.clock.timestamp(),
        };
        let payload = encode_log(&event)?;
        self.publish_with_retry(&self.subjects.log, Bytes::from(payload))
            .await?;
        Ok(event)
    }

    pub async fn info(&self, phase_id: Option<&str>, message: impl Into<String>) -> Result<LogEvent> {
        self.publish_log(phase_id, LogLevel::Info, message).await
    }

    pub async fn warn(&self, phase_id: Option<&str>, message: impl Into<String>) -> Result<LogEvent> {
        self.publish_log(phase_id, LogLevel::Warn, message).await
    }

    pub async fn error(&self, phase_id: Option<&str>, message: impl Into<String>) -> Result<LogEvent> {
        self.publish_log(phase_id, LogLevel::Error, message).await
    }

    async fn publish_with_retry(&self, subject: &str, payload: Bytes) -> Result<()> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.publish(subject, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.retry.max_attempts => {
                    error!(
                        subject = %subject,
                        attempts = attempt,
                        error = %e,
                        "Publish failed, giving up"
                    );
                    return Err(PeerError::PublishExhausted {
                        subject: subject.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let wait = self.retry.backoff(attempt - 1);
                    warn!(
                        subject = %subject,
                        error = %e,
                        "Publish failed, retrying in {}ms (attempt {}/{})",
                        wait.as_millis(),
                        attempt,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
