//! Phase-progression loop for one manifest.
//!
//! Phases run strictly in manifest order. Per phase the peer publishes
//! `running`, narrates the phase on the log subject, performs the phase work
//! and publishes `complete`. Pause and cancel are honoured at every phase
//! boundary; cancel additionally interrupts the phase work.

use std::sync::Arc;

use peer_core::{StartMessage, NO_DESCRIPTION};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::control::{Checkpoint, RunControl, RunTicket};
use crate::error::Result;
use crate::publisher::SessionPublisher;
use crate::state_machine::{PhaseState, PhaseTracker};
use crate::work::{PhaseContext, PhaseWork};

/// An admitted `start` message.
#[derive(Debug)]
pub struct RunRequest {
    pub run_id: Uuid,
    pub start: StartMessage,
    /// Taken at admission when nothing was ahead of this run; otherwise the
    /// runner takes one when the run begins.
    ticket: Option<RunTicket>,
}

impl RunRequest {
    pub fn new(start: StartMessage) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            start,
            ticket: None,
        }
    }

    pub fn with_ticket(mut self, ticket: RunTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase completed (trivially so for an empty manifest)
    Completed,
    Cancelled { phase_id: String },
    Failed { phase_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub phases_total: usize,
    pub phases_completed: usize,
    pub dry_run: bool,
}

pub struct ManifestRunner {
    publisher: SessionPublisher,
    work: Arc<dyn PhaseWork>,
    control: RunControl,
}

impl ManifestRunner {
    pub fn new(publisher: SessionPublisher, work: Arc<dyn PhaseWork>, control: RunControl) -> Self {
        Self {
            publisher,
            work,
            control,
        }
    }

    /// Run the manifest to completion, cancellation or the first failed phase.
    ///
    /// Errors are reserved for publish failures; phase outcomes are reported
    /// in the [`RunReport`].
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let RunRequest {
            run_id,
            start,
            ticket,
        } = request;
        let mut ticket = match ticket {
            Some(ticket) => ticket,
            None => self.control.ticket(),
        };
        let mut report = RunReport {
            run_id,
            outcome: RunOutcome::Completed,
            phases_total: start.manifest.len(),
            phases_completed: 0,
            dry_run: start.dry_run,
        };

        info!(
            run_id = %run_id,
            phases = report.phases_total,
            dry_run = start.dry_run,
            "Processing manifest"
        );

        for (index, phase) in start.manifest.iter().enumerate() {
            let phase_id = phase.resolved_id(index);

            if self.at_boundary(&mut ticket, &phase_id).await? == Checkpoint::Cancelled {
                self.publisher
                    .warn(
                        Some(&phase_id),
                        format!("Run cancelled before phase {}", phase_id),
                    )
                    .await?;
                warn!(run_id = %run_id, phase_id = %phase_id, "Run cancelled at phase boundary");
                report.outcome = RunOutcome::Cancelled { phase_id };
                return Ok(report);
            }

            let mut tracker = PhaseTracker::new(phase_id.clone());
            self.enter(&mut tracker, PhaseState::Running).await?;
            info!(run_id = %run_id, phase_id = %phase_id, "Phase started");

            let description = phase.description();
            if description == NO_DESCRIPTION {
                debug!(phase_id = %phase_id, "Phase has no description");
            }
            let narration = if start.dry_run {
                format!("Dry run: would execute phase: {}", description)
            } else {
                format!("Executing phase: {}", description)
            };
            self.publisher.info(Some(&phase_id), narration).await?;

            let result = if start.dry_run {
                Some(Ok(()))
            } else {
                let ctx = PhaseContext {
                    run_id,
                    index,
                    phase_id: &phase_id,
                    phase,
                };
                tokio::select! {
                    biased;
                    _ = ticket.cancelled() => None,
                    result = self.work.execute(&ctx) => Some(result),
                }
            };

            match result {
                Some(Ok(())) => {
                    self.enter(&mut tracker, PhaseState::Completed).await?;
                    report.phases_completed += 1;
                    info!(run_id = %run_id, phase_id = %phase_id, "Phase completed");
                }
                Some(Err(reason)) => {
                    self.enter(&mut tracker, PhaseState::Failed).await?;
                    self.publisher
                        .error(
                            Some(&phase_id),
                            format!("Phase {} failed: {}", phase_id, reason),
                        )
                        .await?;
                    warn!(run_id = %run_id, phase_id = %phase_id, reason = %reason, "Phase failed");
                    report.outcome = RunOutcome::Failed { phase_id, reason };
                    return Ok(report);
                }
                None => {
                    self.enter(&mut tracker, PhaseState::Cancelled).await?;
                    self.publisher
                        .warn(
                            Some(&phase_id),
                            format!("Run cancelled during phase {}", phase_id),
                        )
                        .await?;
                    warn!(run_id = %run_id, phase_id = %phase_id, "Run cancelled mid-phase");
                    report.outcome = RunOutcome::Cancelled { phase_id };
                    return Ok(report);
                }
            }
        }

        info!(
            run_id = %run_id,
            phases_completed = report.phases_completed,
            "Manifest complete"
        );
        Ok(report)
    }

    /// Hold while paused, narrating the pause and the resume.
    async fn at_boundary(&self, ticket: &mut RunTicket, phase_id: &str) -> Result<Checkpoint> {
        let paused = ticket.is_paused() && !ticket.is_cancelled();
        if paused {
            self.publisher
                .info(
                    Some(phase_id),
                    format!("Run paused before phase {}", phase_id),
                )
                .await?;
            info!(phase_id = %phase_id, "Run paused");
        }

        let checkpoint = ticket.checkpoint().await;
        if paused && checkpoint == Checkpoint::Proceed {
            self.publisher.info(Some(phase_id), "Run resumed").await?;
            info!(phase_id = %phase_id, "Run resumed");
        }
        Ok(checkpoint)
    }

    async fn enter(&self, tracker: &mut PhaseTracker, to: PhaseState) -> Result<()> {
        tracker.advance(to)?;
        if let Some(status) = to.wire_status() {
            self.publisher
                .publish_state(tracker.phase_id(), status)
                .await?;
        }
        Ok(())
    }
}
