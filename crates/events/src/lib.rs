//! Messaging layer for the plan-session peer
//!
//! This crate provides the [`Transport`] seam the peer publishes and
//! subscribes through, an in-process [`EventBus`] with a matching
//! [`MemoryTransport`], and the NATS-backed [`NatsTransport`].

mod bus;
mod error;
mod message;
mod nats;
mod transport;

pub use bus::{EventBus, Subscription};
pub use error::{Result, TransportError};
pub use message::{BusMessage, InboundMessage};
pub use nats::{reconnect_delay, NatsOptions, NatsTransport, DEFAULT_NATS_URL};
pub use transport::{MemoryTransport, MessageStream, Transport};
