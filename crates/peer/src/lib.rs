//! Session peer for the plan-session protocol
//!
//! Executes the manifest of each admitted `start` message phase by phase,
//! reports progress on the session's `state` and `log` subjects and enforces
//! `pause`, `resume` and `cancel` from the `control` subject.

pub mod admission;
pub mod config;
pub mod control;
pub mod error;
pub mod peer;
pub mod publisher;
pub mod runner;
pub mod state_machine;
pub mod work;

pub use admission::{Admission, Refusal};
pub use config::{AdmissionPolicy, PeerConfig, RetryPolicy, DEFAULT_PACING, DEFAULT_QUEUE_CAPACITY};
pub use control::{Checkpoint, ControlEffect, RunControl, RunTicket};
pub use error::{PeerError, Result};
pub use peer::{PeerHandle, SessionPeer};
pub use publisher::SessionPublisher;
pub use runner::{ManifestRunner, RunOutcome, RunReport, RunRequest};
pub use state_machine::{PhaseState, PhaseStateMachine};
pub use work::{PhaseContext, PhaseWork, SimulatedWork};
