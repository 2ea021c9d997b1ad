//! Single-flight admission of `start` messages.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{AdmissionPolicy, PeerConfig};

/// Held by an admitted run until it finishes; dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Why a `start` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// [`AdmissionPolicy::Reject`] and a run is in flight
    Busy,
    /// [`AdmissionPolicy::Queue`] and the queue is full
    QueueFull,
}

impl Refusal {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Busy => "a run is already in progress",
            Self::QueueFull => "the start queue is full",
        }
    }
}

/// Bounds the runs admitted at once: the in-flight run plus, under
/// [`AdmissionPolicy::Queue`], the runs waiting behind it.
#[derive(Debug, Clone)]
pub struct Admission {
    policy: AdmissionPolicy,
    slots: Arc<Semaphore>,
    limit: usize,
}

impl Admission {
    pub fn new(config: &PeerConfig) -> Self {
        let limit = config.admission_limit();
        Self {
            policy: config.admission,
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn try_admit(&self) -> std::result::Result<AdmissionPermit, Refusal> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => Ok(AdmissionPermit { _permit: permit }),
            Err(_) => Err(match self.policy {
                AdmissionPolicy::Reject => Refusal::Busy,
                AdmissionPolicy::Queue => Refusal::QueueFull,
            }),
        }
    }

    /// Runs currently admitted (in flight or queued).
    pub fn admitted(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
