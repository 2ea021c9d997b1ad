//! Run control shared between the control handler and the phase loop.
//!
//! The control handler writes into a `watch` cell; the phase loop holds a
//! [`RunTicket`] and consults it at every phase boundary and while a phase
//! is running. Cancellation is generation-based so a `cancel` only affects
//! the run that was in flight when it arrived. A pause lives only as long as
//! some ticket does: it is refused while idle and cleared when the last
//! ticket is dropped.

use std::sync::Arc;

use peer_core::ControlCommand;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub paused: bool,
    /// Bumped by every `cancel`
    pub cancel_generation: u64,
    /// Live [`RunTicket`]s
    pub active_runs: usize,
}

/// What applying a command changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEffect {
    Paused,
    Resumed,
    Cancelled,
    /// The command was already in effect (e.g. `pause` while paused)
    Unchanged,
    /// `pause` with no run to pause
    Idle,
    /// The command is not one the peer enforces
    Ignored,
}

/// Result of waiting at a phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Proceed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    pub fn apply(&self, command: &ControlCommand) -> ControlEffect {
        let effect = match command {
            ControlCommand::Pause => self.pause(),
            ControlCommand::Resume => self.resume(),
            ControlCommand::Cancel => self.cancel(),
            ControlCommand::Other(_) => ControlEffect::Ignored,
        };
        debug!(command = %command, effect = ?effect, "Control command applied");
        effect
    }

    pub fn pause(&self) -> ControlEffect {
        let mut effect = ControlEffect::Unchanged;
        self.tx.send_if_modified(|state| {
            if state.active_runs == 0 {
                effect = ControlEffect::Idle;
                false
            } else if state.paused {
                false
            } else {
                state.paused = true;
                effect = ControlEffect::Paused;
                true
            }
        });
        effect
    }

    pub fn resume(&self) -> ControlEffect {
        let changed = self.tx.send_if_modified(|state| {
            if state.paused {
                state.paused = false;
                true
            } else {
                false
            }
        });
        if changed {
            ControlEffect::Resumed
        } else {
            ControlEffect::Unchanged
        }
    }

    /// Cancel the in-flight run, if any, and clear a pending pause.
    pub fn cancel(&self) -> ControlEffect {
        self.tx.send_modify(|state| {
            state.paused = false;
            state.cancel_generation = state.cancel_generation.wrapping_add(1);
        });
        ControlEffect::Cancelled
    }

    /// Ticket for a run admitted now; earlier cancels do not affect it.
    ///
    /// The run counts as in flight, for pause and cancel, until the ticket
    /// is dropped.
    pub fn ticket(&self) -> RunTicket {
        let mut generation = 0;
        self.tx.send_modify(|state| {
            state.active_runs += 1;
            generation = state.cancel_generation;
        });
        RunTicket {
            rx: self.tx.subscribe(),
            tx: self.tx.clone(),
            generation,
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A run's view of [`RunControl`].
#[derive(Debug)]
pub struct RunTicket {
    rx: watch::Receiver<ControlState>,
    tx: Arc<watch::Sender<ControlState>>,
    generation: u64,
}

impl RunTicket {
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().cancel_generation != self.generation
    }

    pub fn is_paused(&self) -> bool {
        self.rx.borrow().paused
    }

    /// Wait while paused. Returns `Cancelled` if the run was cancelled
    /// before or during the wait.
    pub async fn checkpoint(&mut self) -> Checkpoint {
        let generation = self.generation;
        let cancelled = self
            .rx
            .wait_for(|state| state.cancel_generation != generation || !state.paused)
            .await
            .map(|state| state.cancel_generation != generation)
            .unwrap_or(true);

        if cancelled {
            Checkpoint::Cancelled
        } else {
            Checkpoint::Proceed
        }
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&mut self) {
        let generation = self.generation;
        // The ticket holds a sender, so the channel cannot close under it.
        let _ = self
            .rx
            .wait_for(|state| state.cancel_generation != generation)
            .await;
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.tx.send_modify(|state| {
            state.active_runs = state.active_runs.saturating_sub(1);
            if state.active_runs == 0 {
                state.paused = false;
            }
        });
    }
}
