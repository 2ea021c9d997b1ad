//! NATS transport backed by `async-nats`.

use std::time::Duration;

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{info, warn};

use crate::error::{Result, TransportError};
use crate::message::InboundMessage;
use crate::transport::{MessageStream, Transport};

/// Broker endpoint used when none is configured.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

const DEFAULT_MAX_RECONNECTS: usize = 5;
const INITIAL_RECONNECT_DELAY_MS: u64 = 1000;
const MAX_RECONNECT_DELAY_MS: u64 = 8000;

/// Connection settings for [`NatsTransport`].
#[derive(Debug, Clone)]
pub struct NatsOptions {
    /// Client name reported to the server
    pub name: String,
    /// Reconnect attempts after the connection drops; `None` retries forever
    pub max_reconnects: Option<usize>,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            name: "plan-peer".to_string(),
            max_reconnects: Some(DEFAULT_MAX_RECONNECTS),
        }
    }
}

/// Exponential reconnect backoff: 1s * 2^attempts, capped at 8s.
pub fn reconnect_delay(attempts: usize) -> Duration {
    let exp = 2u64.saturating_pow(attempts.min(32) as u32);
    let delay_ms = INITIAL_RECONNECT_DELAY_MS
        .saturating_mul(exp)
        .min(MAX_RECONNECT_DELAY_MS);
    Duration::from_millis(delay_ms)
}

/// Transport over a NATS connection.
///
/// The `async-nats` client is internally synchronised, so one transport can be
/// shared by every handler of a peer.
#[derive(Clone)]
pub struct NatsTransport {
    client: Client,
    server_url: String,
}

impl NatsTransport {
    /// Connect to the server at `url`.
    ///
    /// The initial connection is attempted once; a failure is returned so the
    /// caller can abort startup. Later disconnects are retried in the background.
    pub async fn connect(url: &str, options: NatsOptions) -> Result<Self> {
        let connect_options = ConnectOptions::new()
            .name(&options.name)
            .max_reconnects(options.max_reconnects)
            .reconnect_delay_callback(reconnect_delay)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("NATS connection established"),
                    async_nats::Event::Disconnected => warn!("NATS connection lost"),
                    other => info!(event = %other, "NATS connection event"),
                }
            });

        let client = async_nats::connect_with_options(url, connect_options)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        info!(url = %url, "Connected to NATS");

        Ok(Self {
            client,
            server_url: url.to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl std::fmt::Debug for NatsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTransport")
            .field("server_url", &self.server_url)
            .finish()
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::publish(subject, e))
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::subscribe(subject, e))?;

        Ok(Box::pin(subscriber.map(|message| InboundMessage {
            subject: message.subject.to_string(),
            payload: message.payload,
        })))
    }

    async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Flush(e.to_string()))
    }
}
