use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Flush failed: {0}")]
    Flush(String),

    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    pub fn publish(subject: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    pub fn subscribe(subject: impl Into<String>, reason: impl ToString) -> Self {
        Self::Subscribe {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
