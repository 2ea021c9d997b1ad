//! In-process subject bus on a tokio broadcast channel.
//!
//! Every subscriber sees every message; [`Subscription`] applies the
//! subject pattern on the receiving side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use peer_core::subject_matches;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::error::{Result, TransportError};
use crate::message::{BusMessage, InboundMessage};
use crate::transport::MessageStream;

/// Messages buffered per subscriber before it starts lagging
const DEFAULT_CAPACITY: usize = 1024;

struct Shared {
    sender: broadcast::Sender<BusMessage>,
    published: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                sender,
                published: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Publish `payload` on `subject`, returning how many subscribers it reached.
    ///
    /// A message nobody is subscribed to is dropped, not an error.
    pub fn publish(&self, subject: &str, payload: Bytes) -> Result<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .shared
            .sender
            .send(BusMessage::new(subject, payload))
            .unwrap_or(0))
    }

    /// Subscribe to messages whose subject matches `pattern` from now on.
    pub fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(Subscription {
            pattern: pattern.to_string(),
            rx: self.shared.sender.subscribe(),
        })
    }

    /// Refuse further publishes and subscriptions. Live subscriptions keep
    /// draining what was already sent.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.sender.receiver_count()
    }

    /// Total publishes accepted since creation.
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matching messages as a stream. Lagged messages are skipped with a warning.
    pub fn into_stream(self) -> MessageStream {
        let pattern = self.pattern;
        let stream = BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(message) if subject_matches(&pattern, &message.subject) => {
                Some(InboundMessage::from(message))
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(subject = %pattern, skipped, "Subscriber lagged, messages dropped");
                None
            }
        });
        Box::pin(stream)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
