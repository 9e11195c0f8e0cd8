//! Integration tests for the Testing Stage's self-heal loop, exercised
//! end-to-end through `run_testing` against the in-memory fakes rather than
//! by calling the stage's private helpers directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use orch_ai::{AgentEvent, AgentService, ModelRef};
use orch_core::agents::{AgentConfig, AgentRole, AgentRoster};
use orch_core::context::{OrchestratorContext, StageSettings};
use orch_core::events::{EventBus, EventSink, OrchestrationEvent};
use orch_core::executor::AgentExecutor;
use orch_core::labels::{LabelScheme, Role};
use orch_core::plan::TestTask;
use orch_core::resilience::Resilience;
use orch_core::retry::RetryConfig;
use orch_core::stages::testing::{run_testing, TestingError};
use orch_core::state::StateStore;
use orch_core::status::{StatusReporter, StatusSnapshotProvider};
use orch_core::worktree::WorktreeManager;
use orch_test_utils::{FakeAgentService, FakeTracker, ScriptedRun};
use orch_tracker::{Tracker, TicketId, TrackerError};

const MASTER_ID: TicketId = 100;

struct EmptyProvider;
#[async_trait::async_trait]
impl StatusSnapshotProvider for EmptyProvider {
    async fn snapshot(&self, _master_id: TicketId) -> Result<Vec<orch_core::body::StatusRow>, TrackerError> {
        Ok(vec![])
    }
}

/// Records every dispatched event so a test can assert on the exact
/// sequence the self-heal loop produced.
struct RecordingSink(parking_lot::Mutex<Vec<OrchestrationEvent>>);

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self(parking_lot::Mutex::new(Vec::new())))
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().iter().map(|e| e.kind()).collect()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &OrchestrationEvent) {
        self.0.lock().push(event.clone());
    }
}

/// Hand-writes a worktree registry document with a single entry for
/// `MASTER_ID`, matching the on-disk shape `WorktreeManager` reads -- so the
/// test never has to shell out to git to get a registry entry.
fn seed_worktree_registry(registry_path: &Path, work_dir: &Path) {
    let json = format!(
        r#"{{"entries":{{"{MASTER_ID}":{{"ticket_id":{MASTER_ID},"path":"{}","branch":"orch/issue-{MASTER_ID}","created_at":"2024-01-01T00:00:00Z"}}}}}}"#,
        work_dir.to_str().unwrap().replace('\\', "\\\\"),
    );
    std::fs::write(registry_path, json).unwrap();
}

struct Harness {
    ctx: OrchestratorContext,
    tracker: Arc<dyn Tracker>,
    agents: Arc<FakeAgentService>,
    sink: Arc<RecordingSink>,
    // Keeps the temp directory alive for the harness's lifetime.
    _tempdir: tempfile::TempDir,
}

fn build_harness() -> Harness {
    let fake_tracker = Arc::new(FakeTracker::default());
    fake_tracker.seed(MASTER_ID, "master", "original request body", &[]);
    let tracker: Arc<dyn Tracker> = fake_tracker;

    let tempdir = tempfile::TempDir::new().unwrap();
    let registry_path = tempdir.path().join("registry.json");
    seed_worktree_registry(&registry_path, &tempdir.path().join("work"));
    let worktrees = Arc::new(
        WorktreeManager::new(".", tempdir.path().to_path_buf(), registry_path.clone())
            .expect("test harness runs inside a git repo"),
    );

    let agents = Arc::new(FakeAgentService::new());
    let agent_service: Arc<dyn AgentService> = agents.clone();
    let resilience = Arc::new(Resilience::new(Default::default(), Default::default(), 2));
    let executor = Arc::new(AgentExecutor::new(agent_service, resilience.clone(), None));

    let mut roster = AgentRoster::new();
    roster.set(
        AgentRole::Validator,
        AgentConfig {
            model: ModelRef { provider_id: "anthropic".into(), model_id: "validator-model".into() },
            timeout: Duration::from_secs(30),
        },
    );
    roster.set(
        AgentRole::Craftsman,
        AgentConfig {
            model: ModelRef { provider_id: "anthropic".into(), model_id: "craftsman-model".into() },
            timeout: Duration::from_secs(30),
        },
    );

    let labels = LabelScheme::new("orch/");
    let state = Arc::new(StateStore::new(tracker.clone(), labels.clone(), RetryConfig::default()));

    let sink = RecordingSink::new();
    let mut bus = EventBus::new();
    bus.register(sink.clone() as Arc<dyn EventSink>);
    let events = Arc::new(bus);

    let status = StatusReporter::new(
        tracker.clone(),
        labels.clone(),
        Arc::new(EmptyProvider),
        Duration::from_secs(3600),
    );

    let ctx = OrchestratorContext {
        tracker: tracker.clone(),
        labels,
        executor,
        roster,
        state,
        worktrees,
        status,
        events,
        resilience,
        retry_config: RetryConfig::default(),
        settings: StageSettings { max_concurrency: 4, ..Default::default() },
    };

    Harness { ctx, tracker, agents, sink, _tempdir: tempdir }
}

/// Spawns a one-shot task that adds `agent-complete` to `sub_ticket` after a
/// short virtual delay, simulating the external agent's own label write
/// landing in between the self-heal loop clearing it and the poller
/// re-checking it. Safe to fire-and-forget: every test here runs under
/// `#[tokio::test(start_paused = true)]`, so the delay costs no wall time.
fn schedule_agent_complete(tracker: Arc<dyn Tracker>, labels: LabelScheme, sub_ticket: TicketId) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tracker
            .add_label(sub_ticket, &labels.sub_state(orch_core::labels::SubState::AgentComplete))
            .await;
    });
}

fn error_run(message: &str) -> ScriptedRun {
    ScriptedRun::Events(vec![AgentEvent::Error { code: "test-failure".into(), message: message.into() }])
}

fn passing_run() -> ScriptedRun {
    ScriptedRun::Events(vec![AgentEvent::Completed {
        response: "ok".into(),
        attempts: 1,
        tools_executed: 1,
    }])
}

#[tokio::test(start_paused = true)]
async fn self_heal_succeeds_on_third_attempt() {
    let harness = build_harness();
    let test_ticket: TicketId = 10;
    harness.tracker.seed(
        test_ticket,
        "Parses config",
        "AssertionError: expected 2 got 3\nat src/lib.rs:10:4\n",
        &["orch/test", "orch/sub-issue", "orch/master-100"],
    );

    // Phase A fails, then two self-heal retests fail, then the third passes.
    harness.agents.push_script("validator", error_run("AssertionError: expected 2 got 3"));
    harness.agents.push_script("validator", error_run("AssertionError: expected 2 got 3"));
    harness.agents.push_script("validator", error_run("AssertionError: expected 2 got 3"));
    harness.agents.push_script("validator", passing_run());

    schedule_agent_complete(harness.tracker.clone(), harness.ctx.labels.clone(), test_ticket);

    let task = TestTask {
        id: "test-1".into(),
        title: "Parses config".into(),
        description: "validate config parsing".into(),
        test_scenarios: vec!["parses a minimal document".into()],
        depends_on: vec![],
        complexity: None,
        sub_ticket: Some(test_ticket),
    };

    let summary = run_testing(&harness.ctx, MASTER_ID, &[task]).await.unwrap();

    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.details[0].fix_attempts, 3);

    let ticket = harness.tracker.get_ticket(test_ticket).await.unwrap();
    assert!(!ticket.has_label("orch/test-failed"));
    assert!(!ticket.has_label("orch/max-attempts-reached"));
    assert!(ticket.has_label("orch/agent-complete"));

    let fix_label = harness.ctx.labels.role(Role::FixAttempt);
    let open_fixes = harness.tracker.list_open_with_label(&fix_label).await.unwrap();
    assert_eq!(open_fixes.len(), 2, "the two failed fix attempts stay open, the winning one closes");

    let kinds = harness.sink.kinds();
    assert_eq!(
        kinds,
        vec![
            "test-failed",
            "test-fix-started",
            "test-fix-completed",
            "test-fix-started",
            "test-fix-completed",
            "test-fix-started",
            "test-fix-completed",
            "test-passed-after-fix",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn self_heal_exhausts_after_ten_failed_fix_attempts() {
    let harness = build_harness();
    let test_ticket: TicketId = 10;
    harness.tracker.seed(
        test_ticket,
        "Parses config",
        "Error: boom\n",
        &["orch/test", "orch/sub-issue", "orch/master-100"],
    );

    // Phase A's run plus all ten self-heal retests fail.
    for _ in 0..11 {
        harness.agents.push_script("validator", error_run("Error: boom"));
    }

    let task = TestTask {
        id: "test-1".into(),
        title: "Parses config".into(),
        description: "validate config parsing".into(),
        test_scenarios: vec!["parses a minimal document".into()],
        depends_on: vec![],
        complexity: None,
        sub_ticket: Some(test_ticket),
    };

    let result = run_testing(&harness.ctx, MASTER_ID, &[task]).await;
    assert!(matches!(result, Err(TestingError::MaxAttemptsReached)));

    let ticket = harness.tracker.get_ticket(test_ticket).await.unwrap();
    assert!(ticket.has_label("orch/max-attempts-reached"));

    let fix_label = harness.ctx.labels.role(Role::FixAttempt);
    let open_fixes = harness.tracker.list_open_with_label(&fix_label).await.unwrap();
    assert_eq!(open_fixes.len(), 10);

    let kinds = harness.sink.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == "test-fix-started").count(), 10);
    assert_eq!(kinds.iter().filter(|k| **k == "test-fix-completed").count(), 10);
    assert_eq!(kinds.iter().filter(|k| **k == "test-max-attempts-reached").count(), 1);
    assert_eq!(kinds.last(), Some(&"test-max-attempts-reached"));
}

#[tokio::test(start_paused = true)]
async fn fixing_one_test_can_break_a_dependent_test() {
    let harness = build_harness();
    let upstream: TicketId = 10;
    let dependent: TicketId = 20;
    harness.tracker.seed(
        upstream,
        "Parses config",
        "Error: boom\n",
        &["orch/test", "orch/sub-issue", "orch/master-100"],
    );
    harness.tracker.seed(
        dependent,
        "Uses parsed config",
        "body",
        &["orch/test", "orch/sub-issue", "orch/master-100"],
    );

    // Order of validator invocations as `run_testing` actually drives them:
    // 1. Phase A, upstream (fails)
    // 2. Phase A, dependent (passes)
    // 3. self-heal attempt 1 retest of upstream (passes)
    // 4. dependent re-run after upstream's fix (regresses)
    harness.agents.push_script("validator", error_run("Error: boom"));
    harness.agents.push_script("validator", passing_run());
    harness.agents.push_script("validator", passing_run());
    harness.agents.push_script("validator", error_run("Error: now boom too"));

    schedule_agent_complete(harness.tracker.clone(), harness.ctx.labels.clone(), upstream);
    schedule_agent_complete(harness.tracker.clone(), harness.ctx.labels.clone(), dependent);

    let upstream_task = TestTask {
        id: "test-1".into(),
        title: "Parses config".into(),
        description: "validate config parsing".into(),
        test_scenarios: vec![],
        depends_on: vec![],
        complexity: None,
        sub_ticket: Some(upstream),
    };
    let dependent_task = TestTask {
        id: "test-2".into(),
        title: "Uses parsed config".into(),
        description: "validate downstream usage".into(),
        test_scenarios: vec![],
        depends_on: vec!["test-1".into()],
        complexity: None,
        sub_ticket: Some(dependent),
    };

    let result = run_testing(&harness.ctx, MASTER_ID, &[upstream_task, dependent_task]).await;
    match result {
        Err(TestingError::DependentRegression { sub_ticket, dependent: dep }) => {
            assert_eq!(sub_ticket, upstream);
            assert_eq!(dep, dependent);
        }
        other => panic!("expected a dependent regression, got {other:?}"),
    }

    let dependent_ticket = harness.tracker.get_ticket(dependent).await.unwrap();
    assert!(dependent_ticket.has_label("orch/test-failed"));

    let kinds = harness.sink.kinds();
    assert_eq!(
        kinds,
        vec![
            "test-failed",
            "task-completed",
            "test-fix-started",
            "test-fix-completed",
            "test-passed-after-fix",
            "test-failed",
        ]
    );
}
