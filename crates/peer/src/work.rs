//! The work a phase performs while it is `running`.

use std::time::Duration;

use async_trait::async_trait;
use peer_core::Phase;
use uuid::Uuid;

/// Everything a [`PhaseWork`] implementation learns about the phase it runs.
#[derive(Debug, Clone)]
pub struct PhaseContext<'a> {
    pub run_id: Uuid,
    pub index: usize,
    pub phase_id: &'a str,
    pub phase: &'a Phase,
}

/// Work executed for each phase of a manifest.
///
/// The runner races this future against cancellation, so implementations
/// must tolerate being dropped at any await point.
#[async_trait]
pub trait PhaseWork: Send + Sync {
    /// Perform the phase. An `Err` marks the phase failed with that reason.
    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<(), String>;
}

/// Stand-in work that holds for a fixed pacing delay and always succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    duration: Duration,
}

impl SimulatedWork {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl PhaseWork for SimulatedWork {
    async fn execute(&self, _ctx: &PhaseContext<'_>) -> Result<(), String> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}
