use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use events::{MemoryTransport, MessageStream, Transport};
use futures::StreamExt;
use peer::{AdmissionPolicy, PeerConfig, PeerHandle, PhaseContext, PhaseWork, SessionPeer};
use peer_core::{LogEvent, LogLevel, PhaseStatus, SessionId, StateEvent};
use serde_json::{json, Value};
use tokio::time::{timeout, Instant};

const PACING: Duration = Duration::from_millis(500);
const WAIT: Duration = Duration::from_secs(30);

struct TestSession {
    transport: Arc<MemoryTransport>,
    handle: PeerHandle,
    states: MessageStream,
    logs: MessageStream,
}

impl TestSession {
    async fn start(config: PeerConfig) -> Self {
        Self::start_with(config, None).await
    }

    async fn start_with(config: PeerConfig, work: Option<Arc<dyn PhaseWork>>) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let id = config.session_id.clone();
        let states = transport
            .subscribe(&format!("plan.session.{}.state", id))
            .await
            .unwrap();
        let logs = transport
            .subscribe(&format!("plan.session.{}.log", id))
            .await
            .unwrap();

        let mut peer = SessionPeer::new(config, transport.clone());
        if let Some(work) = work {
            peer = peer.with_work(work);
        }
        let handle = peer.start().await.expect("peer should start");

        Self {
            transport,
            handle,
            states,
            logs,
        }
    }

    async fn publish_raw(&self, topic: &str, payload: &[u8]) {
        let subject = format!("plan.session.{}.{}", self.handle.subjects().session_id, topic);
        self.transport
            .publish(&subject, Bytes::copy_from_slice(payload))
            .await
            .unwrap();
    }

    async fn send_start(&self, payload: Value) {
        self.publish_raw("start", payload.to_string().as_bytes()).await;
    }

    async fn send_control(&self, payload: Value) {
        self.publish_raw("control", payload.to_string().as_bytes()).await;
    }

    async fn next_state(&mut self) -> StateEvent {
        let message = timeout(WAIT, self.states.next())
            .await
            .expect("timed out waiting for state")
            .expect("state stream ended");
        serde_json::from_slice(&message.payload).unwrap()
    }

    async fn next_log(&mut self) -> LogEvent {
        let message = timeout(WAIT, self.logs.next())
            .await
            .expect("timed out waiting for log")
            .expect("log stream ended");
        serde_json::from_slice(&message.payload).unwrap()
    }

    async fn expect_no_state(&mut self, within: Duration) {
        if let Ok(Some(message)) = timeout(within, self.states.next()).await {
            panic!(
                "unexpected state: {}",
                String::from_utf8_lossy(&message.payload)
            );
        }
    }

    async fn drain_logs(&mut self, within: Duration) -> Vec<LogEvent> {
        let mut logs = Vec::new();
        while let Ok(Some(message)) = timeout(within, self.logs.next()).await {
            logs.push(serde_json::from_slice(&message.payload).unwrap());
        }
        logs
    }
}

fn config(id: &str) -> PeerConfig {
    PeerConfig::new(SessionId::new(id).unwrap()).with_pacing(PACING)
}

fn assert_state(state: &StateEvent, phase_id: &str, status: PhaseStatus) {
    assert_eq!(state.phase_id, phase_id, "unexpected phase in {:?}", state);
    assert_eq!(state.status, status, "unexpected status in {:?}", state);
}

mod progression {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_two_phase_manifest() {
        let mut session = TestSession::start(config("two-phase")).await;
        session
            .send_start(json!({
                "manifest": [
                    {"id": "p1", "spec": {"description": "build"}},
                    {"id": "p2"}
                ],
                "dryRun": false
            }))
            .await;

        let mut states = Vec::new();
        for _ in 0..4 {
            states.push(session.next_state().await);
        }
        assert_state(&states[0], "p1", PhaseStatus::Running);
        assert_state(&states[1], "p1", PhaseStatus::Complete);
        assert_state(&states[2], "p2", PhaseStatus::Running);
        assert_state(&states[3], "p2", PhaseStatus::Complete);

        for pair in states.windows(2) {
            assert!(pair[0].updated <= pair[1].updated);
        }
        assert!(states.iter().all(|s| s.updated.ends_with('Z')));

        let first = session.next_log().await;
        assert_eq!(first.phase_id.as_deref(), Some("p1"));
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.message, "Executing phase: build");

        let second = session.next_log().await;
        assert_eq!(second.phase_id.as_deref(), Some("p2"));
        assert_eq!(second.message, "Executing phase: No description");
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_count_is_twice_manifest_length() {
        for n in [1usize, 3, 5] {
            let mut session = TestSession::start(config(&format!("count-{}", n))).await;
            let manifest: Vec<Value> = (0..n)
                .map(|i| json!({"id": format!("step-{}", i), "spec": {"description": format!("d{}", i)}}))
                .collect();
            session.send_start(json!({ "manifest": manifest })).await;

            for i in 0..n {
                let phase_id = format!("step-{}", i);
                assert_state(&session.next_state().await, &phase_id, PhaseStatus::Running);
                assert_state(&session.next_state().await, &phase_id, PhaseStatus::Complete);
            }
            session.expect_no_state(Duration::from_secs(5)).await;

            let logs = session.drain_logs(Duration::from_secs(1)).await;
            assert!(logs.len() >= n);
            for (i, log) in logs.iter().take(n).enumerate() {
                assert_eq!(log.message, format!("Executing phase: d{}", i));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_positional_id_fallback() {
        let mut session = TestSession::start(config("fallback")).await;
        session
            .send_start(json!({
                "manifest": [{"id": "named"}, {}, {"spec": {"description": "third"}}]
            }))
            .await;

        let ids: Vec<String> = {
            let mut ids = Vec::new();
            for _ in 0..6 {
                ids.push(session.next_state().await.phase_id);
            }
            ids
        };
        assert_eq!(
            ids,
            vec!["named", "named", "phase-1", "phase-1", "phase-2", "phase-2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_holds_for_pacing() {
        let mut session = TestSession::start(config("pacing")).await;
        session.send_start(json!({"manifest": [{"id": "p1"}]})).await;

        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        let entered = Instant::now();
        assert_state(&session.next_state().await, "p1", PhaseStatus::Complete);
        assert!(entered.elapsed() >= PACING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_manifest_returns_to_idle() {
        let mut session = TestSession::start(config("empty")).await;
        session.send_start(json!({"manifest": []})).await;
        session.expect_no_state(Duration::from_secs(5)).await;

        session.send_start(json!({})).await;
        session.expect_no_state(Duration::from_secs(5)).await;
        assert_eq!(session.handle.admitted_runs(), 0);

        session.send_start(json!({"manifest": [{"id": "after"}]})).await;
        assert_state(&session.next_state().await, "after", PhaseStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_narrates_without_work() {
        let mut session = TestSession::start(config("dry")).await;
        session
            .send_start(json!({
                "manifest": [{"id": "p1", "spec": {"description": "build"}}],
                "dryRun": true
            }))
            .await;

        let started = Instant::now();
        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        assert_state(&session.next_state().await, "p1", PhaseStatus::Complete);
        assert!(started.elapsed() < PACING);

        let log = session.next_log().await;
        assert_eq!(log.message, "Dry run: would execute phase: build");
    }
}

mod malformed {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_malformed_start_is_dropped() {
        let mut session = TestSession::start(config("bad-start")).await;
        session.publish_raw("start", b"not json at all").await;
        session.publish_raw("start", b"[1, 2, 3]").await;
        session.send_start(json!({"manifest": "p1"})).await;
        session.send_start(json!({"manifest": [{"id": "ok"}]})).await;

        assert_state(&session.next_state().await, "ok", PhaseStatus::Running);
        assert_state(&session.next_state().await, "ok", PhaseStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_control_is_dropped() {
        let mut session = TestSession::start(config("bad-control")).await;
        session.publish_raw("control", b"{{{").await;
        session.publish_raw("control", b"\"pause\"").await;
        session.send_control(json!({"command": "pause"})).await;

        let log = session.next_log().await;
        assert_eq!(log.message, "Control command received: pause");
        assert_eq!(log.phase_id, None);
    }
}

mod control {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command_is_acknowledged() {
        let mut session = TestSession::start(config("unknown-cmd")).await;
        session.send_control(json!({"reason": "no command"})).await;
        session.send_control(json!({"command": "rewind", "to": "p1"})).await;

        assert_eq!(
            session.next_log().await.message,
            "Control command received: unknown"
        );
        assert_eq!(
            session.next_log().await.message,
            "Control command received: rewind"
        );
        assert!(!session.handle.control().state().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_acknowledged_promptly_and_holds_next_phase() {
        let mut session = TestSession::start(config("pause")).await;
        session
            .send_start(json!({
                "manifest": [
                    {"id": "p1", "spec": {"description": "build"}},
                    {"id": "p2", "spec": {"description": "deploy"}}
                ]
            }))
            .await;

        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        assert_eq!(session.next_log().await.message, "Executing phase: build");

        let sent = Instant::now();
        session.send_control(json!({"command": "pause"})).await;
        let ack = session.next_log().await;
        assert_eq!(ack.message, "Control command received: pause");
        assert_eq!(ack.phase_id, None);
        assert!(sent.elapsed() < PACING);

        assert_state(&session.next_state().await, "p1", PhaseStatus::Complete);
        assert_eq!(
            session.next_log().await.message,
            "Run paused before phase p2"
        );
        session.expect_no_state(Duration::from_secs(10)).await;

        session.send_control(json!({"command": "resume"})).await;
        assert_eq!(
            session.next_log().await.message,
            "Control command received: resume"
        );
        assert_eq!(session.next_log().await.message, "Run resumed");
        assert_state(&session.next_state().await, "p2", PhaseStatus::Running);
        assert_state(&session.next_state().await, "p2", PhaseStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_phase() {
        let mut session = TestSession::start(config("cancel")).await;
        session
            .send_start(json!({"manifest": [{"id": "p1"}, {"id": "p2"}, {"id": "p3"}]}))
            .await;

        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        let sent = Instant::now();
        session.send_control(json!({"command": "cancel"})).await;

        assert_state(&session.next_state().await, "p1", PhaseStatus::Cancelled);
        assert!(sent.elapsed() < PACING);
        session.expect_no_state(Duration::from_secs(10)).await;

        let messages: Vec<String> = session
            .drain_logs(Duration::from_secs(1))
            .await
            .into_iter()
            .map(|log| log.message)
            .collect();
        assert!(messages.contains(&"Control command received: cancel".to_string()));
        assert!(messages.contains(&"Run cancelled during phase p1".to_string()));
        assert_eq!(session.handle.admitted_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_paused_ends_run_at_boundary() {
        let mut session = TestSession::start(config("cancel-paused")).await;
        session
            .send_start(json!({"manifest": [{"id": "p1"}, {"id": "p2"}]}))
            .await;

        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        session.send_control(json!({"command": "pause"})).await;
        assert_state(&session.next_state().await, "p1", PhaseStatus::Complete);

        session.send_control(json!({"command": "cancel"})).await;
        session.expect_no_state(Duration::from_secs(10)).await;

        let logs = session.drain_logs(Duration::from_secs(1)).await;
        let cancelled = logs
            .iter()
            .find(|log| log.message == "Run cancelled before phase p2")
            .expect("boundary cancel should be narrated");
        assert_eq!(cancelled.level, LogLevel::Warn);
        assert!(!session.handle.control().state().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle_does_not_affect_next_run() {
        let mut session = TestSession::start(config("cancel-idle")).await;
        session.send_control(json!({"command": "cancel"})).await;
        assert_eq!(
            session.next_log().await.message,
            "Control command received: cancel"
        );

        session.send_start(json!({"manifest": [{"id": "p1"}]})).await;
        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        assert_state(&session.next_state().await, "p1", PhaseStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_in_last_phase_does_not_hold_next_run() {
        let mut session = TestSession::start(config("pause-last")).await;
        session.send_start(json!({"manifest": [{"id": "a1"}]})).await;
        assert_state(&session.next_state().await, "a1", PhaseStatus::Running);

        session.send_control(json!({"command": "pause"})).await;
        assert_state(&session.next_state().await, "a1", PhaseStatus::Complete);

        session.send_start(json!({"manifest": [{"id": "b1"}]})).await;
        assert_state(&session.next_state().await, "b1", PhaseStatus::Running);
        assert_state(&session.next_state().await, "b1", PhaseStatus::Complete);

        let messages: Vec<String> = session
            .drain_logs(Duration::from_secs(1))
            .await
            .into_iter()
            .map(|log| log.message)
            .collect();
        assert!(messages.contains(&"Control command received: pause".to_string()));
        assert!(!messages.iter().any(|m| m.starts_with("Run paused")));
        assert!(!session.handle.control().state().paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_when_idle_does_not_hold_next_run() {
        let mut session = TestSession::start(config("pause-idle")).await;
        session.send_control(json!({"command": "pause"})).await;
        assert_eq!(
            session.next_log().await.message,
            "Control command received: pause"
        );
        assert!(!session.handle.control().state().paused);

        session.send_start(json!({"manifest": [{"id": "p1"}]})).await;
        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        assert_state(&session.next_state().await, "p1", PhaseStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_right_after_start_is_not_lost() {
        let mut session = TestSession::start(config("cancel-early")).await;
        session
            .send_start(json!({"manifest": [{"id": "p1"}, {"id": "p2"}]}))
            .await;
        while session.handle.admitted_runs() == 0 {
            tokio::task::yield_now().await;
        }
        session.send_control(json!({"command": "cancel"})).await;

        let quiet = Duration::from_secs(5);
        while let Ok(Some(message)) = timeout(quiet, session.states.next()).await {
            let state: StateEvent = serde_json::from_slice(&message.payload).unwrap();
            assert_ne!(state.status, PhaseStatus::Complete, "run kept going: {:?}", state);
            assert_ne!(state.phase_id, "p2", "run kept going: {:?}", state);
        }

        let logs = session.drain_logs(Duration::from_secs(1)).await;
        assert!(logs.iter().any(|log| log.message.starts_with("Run cancelled")));
        assert_eq!(session.handle.admitted_runs(), 0);
    }
}

mod admission {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_queued_starts_run_sequentially() {
        let mut session = TestSession::start(config("queue")).await;
        session.send_start(json!({"manifest": [{"id": "a1"}, {"id": "a2"}]})).await;
        session.send_start(json!({"manifest": [{"id": "b1"}]})).await;

        let expected = [
            ("a1", PhaseStatus::Running),
            ("a1", PhaseStatus::Complete),
            ("a2", PhaseStatus::Running),
            ("a2", PhaseStatus::Complete),
            ("b1", PhaseStatus::Running),
            ("b1", PhaseStatus::Complete),
        ];
        for (phase_id, status) in expected {
            assert_state(&session.next_state().await, phase_id, status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_policy_refuses_concurrent_start() {
        let mut session =
            TestSession::start(config("reject").with_admission(AdmissionPolicy::Reject)).await;
        session
            .send_start(json!({"manifest": [{"id": "a1", "spec": {"description": "first"}}]}))
            .await;
        assert_state(&session.next_state().await, "a1", PhaseStatus::Running);

        session.send_start(json!({"manifest": [{"id": "b1"}]})).await;
        assert_eq!(session.next_log().await.message, "Executing phase: first");
        let rejection = session.next_log().await;
        assert_eq!(rejection.level, LogLevel::Warn);
        assert_eq!(
            rejection.message,
            "Start rejected: a run is already in progress"
        );

        assert_state(&session.next_state().await, "a1", PhaseStatus::Complete);
        session.expect_no_state(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects() {
        let mut session = TestSession::start(config("full").with_queue_capacity(1)).await;
        session.send_start(json!({"manifest": [{"id": "a"}]})).await;
        session.send_start(json!({"manifest": [{"id": "b"}]})).await;
        session.send_start(json!({"manifest": [{"id": "c"}]})).await;

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(session.next_state().await.phase_id);
        }
        assert_eq!(ids, vec!["a", "a", "b", "b"]);
        session.expect_no_state(Duration::from_secs(5)).await;

        let logs = session.drain_logs(Duration::from_secs(1)).await;
        assert!(logs
            .iter()
            .any(|log| log.message == "Start rejected: the start queue is full"));
    }
}

mod lifecycle {
    use super::*;

    struct BrokenWork;

    #[async_trait]
    impl PhaseWork for BrokenWork {
        async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<(), String> {
            Err(format!("no runner for {}", ctx.phase_id))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_work_reports_failure() {
        let mut session = TestSession::start_with(config("broken"), Some(Arc::new(BrokenWork))).await;
        session
            .send_start(json!({"manifest": [{"id": "p1"}, {"id": "p2"}]}))
            .await;

        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);
        assert_state(&session.next_state().await, "p1", PhaseStatus::Failed);
        session.expect_no_state(Duration::from_secs(5)).await;

        session.next_log().await;
        let failure = session.next_log().await;
        assert_eq!(failure.level, LogLevel::Error);
        assert_eq!(failure.message, "Phase p1 failed: no runner for p1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_run() {
        let mut session = TestSession::start(config("shutdown")).await;
        session
            .send_start(json!({"manifest": [{"id": "p1"}, {"id": "p2"}]}))
            .await;
        session.send_start(json!({"manifest": [{"id": "queued"}]})).await;
        assert_state(&session.next_state().await, "p1", PhaseStatus::Running);

        let TestSession {
            transport: _transport,
            handle,
            mut states,
            ..
        } = session;
        handle.shutdown().await.unwrap();

        let message = timeout(WAIT, states.next()).await.unwrap().unwrap();
        let state: StateEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_state(&state, "p1", PhaseStatus::Cancelled);
        assert!(!matches!(
            timeout(Duration::from_secs(5), states.next()).await,
            Ok(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_events_subject_is_reserved() {
        let session = TestSession::start(config("reserved")).await;
        assert_eq!(
            session.handle.subjects().events,
            "plan.session.reserved.events"
        );
        let mut events = session
            .transport
            .subscribe("plan.session.reserved.events")
            .await
            .unwrap();
        session
            .send_start(json!({"manifest": [{"id": "p1"}]}))
            .await;
        session.send_control(json!({"command": "pause"})).await;
        assert!(timeout(Duration::from_millis(50), events.next())
            .await
            .is_err());
    }
}

mod retry {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use events::TransportError;

    /// Fails the first `failures` state publishes, then behaves.
    struct FlakyTransport {
        inner: MemoryTransport,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn publish(&self, subject: &str, payload: Bytes) -> events::Result<()> {
            if subject.ends_with(".state")
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(TransportError::publish(subject, "connection reset"));
            }
            self.inner.publish(subject, payload).await
        }

        async fn subscribe(&self, subject: &str) -> events::Result<MessageStream> {
            self.inner.subscribe(subject).await
        }

        async fn flush(&self) -> events::Result<()> {
            self.inner.flush().await
        }
    }

    async fn flaky_session(id: &str, failures: u32) -> (MemoryTransport, PeerHandle, MessageStream) {
        let bus = MemoryTransport::new();
        let observer = MemoryTransport::with_bus(bus.bus().clone());
        let states = observer
            .subscribe(&format!("plan.session.{}.state", id))
            .await
            .unwrap();
        let transport = FlakyTransport {
            inner: bus,
            failures: AtomicU32::new(failures),
        };
        let handle = SessionPeer::new(config(id), Arc::new(transport))
            .start()
            .await
            .unwrap();
        (observer, handle, states)
    }

    async fn next_state(states: &mut MessageStream) -> StateEvent {
        let message = timeout(WAIT, states.next()).await.unwrap().unwrap();
        serde_json::from_slice(&message.payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_publish_recovers_within_retry_budget() {
        let (observer, handle, mut states) = flaky_session("flaky", 2).await;
        observer
            .publish(
                "plan.session.flaky.start",
                Bytes::from(json!({"manifest": [{"id": "p1"}]}).to_string()),
            )
            .await
            .unwrap();

        assert_state(&next_state(&mut states).await, "p1", PhaseStatus::Running);
        assert_state(&next_state(&mut states).await, "p1", PhaseStatus::Complete);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_publish_aborts_run_but_not_peer() {
        let (observer, handle, mut states) = flaky_session("outage", 3).await;
        let start = Bytes::from(json!({"manifest": [{"id": "p1"}, {"id": "p2"}]}).to_string());
        observer
            .publish("plan.session.outage.start", start)
            .await
            .unwrap();
        assert!(!matches!(
            timeout(Duration::from_secs(5), states.next()).await,
            Ok(Some(_))
        ));
        assert_eq!(handle.admitted_runs(), 0);

        observer
            .publish(
                "plan.session.outage.start",
                Bytes::from(json!({"manifest": [{"id": "again"}]}).to_string()),
            )
            .await
            .unwrap();
        assert_state(&next_state(&mut states).await, "again", PhaseStatus::Running);
        assert_state(&next_state(&mut states).await, "again", PhaseStatus::Complete);
        handle.shutdown().await.unwrap();
    }
}
