use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },

    #[error("Failed to encode {kind} record: {reason}")]
    Encode { kind: &'static str, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
