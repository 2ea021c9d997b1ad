//! The publish/subscribe seam between the peer and its broker.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tracing::debug;

use crate::bus::EventBus;
use crate::error::Result;
use crate::message::InboundMessage;

/// Stream of messages delivered to one subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Broker connection shared by every handler of a peer.
///
/// Implementations must accept concurrent `publish` calls from several tasks
/// without interleaving the bytes of different payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to `subject`, which may contain `*` and `>` wildcards.
    async fn subscribe(&self, subject: &str) -> Result<MessageStream>;

    /// Wait until everything published so far has left the process.
    async fn flush(&self) -> Result<()>;
}

/// Transport backed by an in-process [`EventBus`].
///
/// Used when peer and coordinator share a process, and by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    bus: EventBus,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing bus, e.g. between two transports in one process.
    pub fn with_bus(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn close(&self) {
        self.bus.close();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let delivered = self.bus.publish(subject, payload)?;
        debug!(subject = %subject, delivered, "Published to memory bus");
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream> {
        Ok(self.bus.subscribe(subject)?.into_stream())
    }

    async fn flush(&self) -> Result<()> {
        // Delivery into the broadcast channel is synchronous.
        Ok(())
    }
}
