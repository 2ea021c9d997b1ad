use events::TransportError;
use peer_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] CoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Publish to {subject} failed after {attempts} attempts: {source}")]
    PublishExhausted {
        subject: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PeerError {
    /// Whether the error came from the broker connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::PublishExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
