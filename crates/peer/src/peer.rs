//! Session peer lifecycle.
//!
//! A started peer owns three tasks: the start handler (decode and admit),
//! the control handler (acknowledge and apply) and the run worker, which
//! executes admitted manifests one at a time.

use std::sync::Arc;

use events::{MessageStream, Transport};
use futures::StreamExt;
use peer_core::codec::{decode_control, decode_start};
use peer_core::SessionSubjects;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::admission::{Admission, AdmissionPermit};
use crate::config::PeerConfig;
use crate::control::{ControlEffect, RunControl};
use crate::error::Result;
use crate::publisher::SessionPublisher;
use crate::runner::{ManifestRunner, RunOutcome, RunRequest};
use crate::work::{PhaseWork, SimulatedWork};

type Admitted = (RunRequest, AdmissionPermit);

pub struct SessionPeer {
    config: PeerConfig,
    transport: Arc<dyn Transport>,
    work: Arc<dyn PhaseWork>,
}

impl SessionPeer {
    /// Peer whose phases hold for `config.pacing` and always succeed.
    pub fn new(config: PeerConfig, transport: Arc<dyn Transport>) -> Self {
        let work = Arc::new(SimulatedWork::new(config.pacing));
        Self {
            config,
            transport,
            work,
        }
    }

    pub fn with_work(mut self, work: Arc<dyn PhaseWork>) -> Self {
        self.work = work;
        self
    }

    /// Subscribe to the session's inbound subjects and spawn the handlers.
    ///
    /// Returns once both subscriptions are live, so messages published after
    /// this resolves are guaranteed to be seen.
    pub async fn start(self) -> Result<PeerHandle> {
        self.config.validate()?;

        let subjects = Arc::new(SessionSubjects::new(self.config.session_id.clone()));
        if subjects.session_id.has_delimiter_collision() {
            warn!(
                session_id = %subjects.session_id,
                "Session id contains subject delimiter or wildcard characters"
            );
        }

        let start_stream = self.transport.subscribe(&subjects.start).await?;
        let control_stream = self.transport.subscribe(&subjects.control).await?;

        let publisher =
            SessionPublisher::new(self.transport.clone(), subjects.clone(), self.config.retry);
        let control = RunControl::new();
        let admission = Admission::new(&self.config);
        let (run_tx, run_rx) = mpsc::channel::<Admitted>(admission.limit());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = info_span!("peer", session_id = %subjects.session_id);
        let runner = ManifestRunner::new(publisher.clone(), self.work, control.clone());

        let tasks = vec![
            tokio::spawn(run_worker(runner, run_rx, shutdown_rx.clone()).instrument(span.clone())),
            tokio::spawn(
                start_loop(
                    start_stream,
                    publisher.clone(),
                    admission.clone(),
                    control.clone(),
                    run_tx,
                    shutdown_rx.clone(),
                )
                .instrument(span.clone()),
            ),
            tokio::spawn(
                control_loop(control_stream, publisher, control.clone(), shutdown_rx)
                    .instrument(span),
            ),
        ];

        info!(
            session_id = %subjects.session_id,
            start = %subjects.start,
            control = %subjects.control,
            admission = %self.config.admission,
            "Peer listening"
        );

        Ok(PeerHandle {
            subjects,
            control,
            admission,
            transport: self.transport,
            shutdown_tx,
            tasks,
        })
    }
}

/// Handle to a running peer.
pub struct PeerHandle {
    subjects: Arc<SessionSubjects>,
    control: RunControl,
    admission: Admission,
    transport: Arc<dyn Transport>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerHandle {
    pub fn subjects(&self) -> &SessionSubjects {
        &self.subjects
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Runs in flight or queued.
    pub fn admitted_runs(&self) -> usize {
        self.admission.admitted()
    }

    /// Stop the handlers, cancel the in-flight run, drop queued runs and
    /// flush the transport.
    pub async fn shutdown(self) -> Result<()> {
        info!(session_id = %self.subjects.session_id, "Peer shutting down");
        self.shutdown_tx.send_replace(true);
        self.control.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Peer task ended abnormally");
            }
        }

        self.transport.flush().await?;
        info!(session_id = %self.subjects.session_id, "Peer stopped");
        Ok(())
    }
}

async fn start_loop(
    mut stream: MessageStream,
    publisher: SessionPublisher,
    admission: Admission,
    control: RunControl,
    run_tx: mpsc::Sender<Admitted>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = stream.next() => match message {
                Some(message) => message,
                None => {
                    warn!("Start subscription closed");
                    break;
                }
            },
        };

        let start = match decode_start(&message.payload) {
            Ok(start) => start,
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "Dropping malformed start message");
                continue;
            }
        };

        info!(
            phases = start.manifest.len(),
            dry_run = start.dry_run,
            "Received start message"
        );

        let permit = match admission.try_admit() {
            Ok(permit) => permit,
            Err(refusal) => {
                warn!(reason = refusal.reason(), "Start rejected");
                if let Err(e) = publisher
                    .warn(None, format!("Start rejected: {}", refusal.reason()))
                    .await
                {
                    error!(error = %e, "Failed to publish start rejection");
                }
                continue;
            }
        };

        let mut request = RunRequest::new(start);
        if admission.admitted() == 1 {
            // Nothing ahead of it: the run is in flight from now on, so a
            // cancel or pause arriving before the worker picks it up applies.
            request = request.with_ticket(control.ticket());
        } else {
            info!(run_id = %request.run_id, "Start queued behind in-flight run");
        }
        if run_tx.try_send((request, permit)).is_err() {
            error!("Run worker is gone, stopping start handler");
            break;
        }
    }
}

async fn control_loop(
    mut stream: MessageStream,
    publisher: SessionPublisher,
    control: RunControl,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = stream.next() => match message {
                Some(message) => message,
                None => {
                    warn!("Control subscription closed");
                    break;
                }
            },
        };

        let message = match decode_control(&message.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "Dropping malformed control message");
                continue;
            }
        };

        let name = message.command_name();
        info!(command = %name, "Received control command");

        if let Err(e) = publisher
            .info(None, format!("Control command received: {}", name))
            .await
        {
            error!(error = %e, "Failed to acknowledge control command");
        }

        match control.apply(&message.command()) {
            ControlEffect::Ignored => debug!(command = %name, "Control command not enforced"),
            ControlEffect::Idle => info!(command = %name, "No run in flight, nothing to pause"),
            effect => info!(command = %name, effect = ?effect, "Control command applied"),
        }
    }
}

async fn run_worker(
    runner: ManifestRunner,
    mut run_rx: mpsc::Receiver<Admitted>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (request, _permit) = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            admitted = run_rx.recv() => match admitted {
                Some(admitted) => admitted,
                None => break,
            },
        };
        if *shutdown.borrow() {
            break;
        }

        let span = info_span!("run", run_id = %request.run_id);
        match runner.run(request).instrument(span).await {
            Ok(report) => match report.outcome {
                RunOutcome::Completed => debug!(
                    run_id = %report.run_id,
                    phases = report.phases_completed,
                    "Run finished"
                ),
                ref outcome => info!(
                    run_id = %report.run_id,
                    outcome = ?outcome,
                    completed = report.phases_completed,
                    total = report.phases_total,
                    "Run ended early"
                ),
            },
            Err(e) if e.is_transport() => {
                error!(error = %e, "Run aborted, broker unreachable")
            }
            Err(e) => error!(error = %e, "Run aborted"),
        }
    }

    let dropped = run_rx.len();
    if dropped > 0 {
        info!(dropped, "Dropping queued runs on shutdown");
    }
}
