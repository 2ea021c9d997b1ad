use peer_core::PhaseStatus;

use crate::error::{PeerError, Result};

/// Lifecycle of one phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PhaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status published on entering this state; `Pending` is never published.
    pub fn wire_status(&self) -> Option<PhaseStatus> {
        match self {
            Self::Pending => None,
            Self::Running => Some(PhaseStatus::Running),
            Self::Completed => Some(PhaseStatus::Complete),
            Self::Failed => Some(PhaseStatus::Failed),
            Self::Cancelled => Some(PhaseStatus::Cancelled),
        }
    }
}

pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(from: &PhaseState, to: &PhaseState) -> Result<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(PeerError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &PhaseState) -> &'static [PhaseState] {
        match from {
            PhaseState::Pending => &[PhaseState::Running, PhaseState::Cancelled],
            PhaseState::Running => &[
                PhaseState::Completed,
                PhaseState::Failed,
                PhaseState::Cancelled,
            ],
            PhaseState::Completed | PhaseState::Failed | PhaseState::Cancelled => &[],
        }
    }

    pub fn can_transition(from: &PhaseState, to: &PhaseState) -> bool {
        Self::allowed_transitions(from).contains(to)
    }
}

/// Current state of one phase, advanced only along valid transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase_id: String,
    state: PhaseState,
}

impl PhaseTracker {
    pub fn new(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            state: PhaseState::Pending,
        }
    }

    pub fn phase_id(&self) -> &str {
        &self.phase_id
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn advance(&mut self, to: PhaseState) -> Result<PhaseState> {
        PhaseStateMachine::validate_transition(&self.state, &to)?;
        self.state = to;
        Ok(to)
    }
}
