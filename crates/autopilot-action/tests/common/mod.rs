//! Shared harness for the engine integration tests.
//!
//! Every scenario runs against both store backends. The clock is manual so
//! undo windows and rate-limit windows can be crossed deterministically.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tempfile::TempDir;

use autopilot_action::{ActionHandler, Executor, HandlerError, UndoHandler};
use autopilot_core::clock::ManualClock;
use autopilot_core::config::{ExecutorConfig, RateLimitConfig};
use autopilot_core::types::{
    ActionType, AuditLogEntry, AutomationRule, AutonomyLevel, ExecutedActionRecord, RuleAction,
};
use autopilot_storage::{ActionStore, AuditFilter, MemoryStore, SqliteStore};

pub const TENANT: &str = "acme";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Memory, Backend::Sqlite];
}

/// Handler that records every call and can be told to fail or stall.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(ActionType, String)>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<StdDuration>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<(ActionType, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn fail_with(&self, error: &str) {
        *self.failure.lock().unwrap() = Some(error.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn stall_for(&self, delay: StdDuration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn run(&self, action_type: ActionType, candidate_id: &str) -> Result<(), HandlerError> {
        self.calls
            .lock()
            .unwrap()
            .push((action_type, candidate_id.to_string()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(error) => Err(HandlerError::Failed(error)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn execute(
        &self,
        action: &RuleAction,
        candidate_id: &str,
        _related_entity_id: Option<&str>,
    ) -> Result<(), HandlerError> {
        self.run(action.action_type(), candidate_id).await
    }
}

#[async_trait]
impl UndoHandler for RecordingHandler {
    async fn undo(&self, record: &ExecutedActionRecord) -> Result<(), HandlerError> {
        self.run(record.action_type(), &record.candidate_id).await
    }
}

pub struct Harness {
    pub backend: Backend,
    pub executor: Arc<Executor>,
    pub store: Arc<dyn ActionStore>,
    pub clock: Arc<ManualClock>,
    pub actions: Arc<RecordingHandler>,
    pub undos: Arc<RecordingHandler>,
    config: ExecutorConfig,
    rate_limit: RateLimitConfig,
    dir: TempDir,
}

impl Harness {
    pub fn new(backend: Backend) -> Self {
        Self::with_config(backend, ExecutorConfig::default(), RateLimitConfig::default())
    }

    pub fn with_config(
        backend: Backend,
        config: ExecutorConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ActionStore> = match backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Sqlite => Arc::new(SqliteStore::open(&dir.path().join("autopilot.db")).unwrap()),
        };
        let clock = Arc::new(ManualClock::starting_now());
        let actions = Arc::new(RecordingHandler::default());
        let undos = Arc::new(RecordingHandler::default());
        let executor = build(
            &config,
            &rate_limit,
            Arc::clone(&store),
            Arc::clone(&clock),
            &actions,
            &undos,
        );
        Self {
            backend,
            executor,
            store,
            clock,
            actions,
            undos,
            config,
            rate_limit,
            dir,
        }
    }

    /// Simulate a process restart: a fresh executor over the same data.
    ///
    /// SQLite reopens the database file; the memory backend keeps its store.
    pub fn restart(&mut self) {
        if self.backend == Backend::Sqlite {
            self.store = Arc::new(SqliteStore::open(&self.dir.path().join("autopilot.db")).unwrap());
        }
        self.executor = build(
            &self.config,
            &self.rate_limit,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            &self.actions,
            &self.undos,
        );
    }

    pub fn rule(&self, name: &str, level: AutonomyLevel, action: RuleAction) -> AutomationRule {
        let rule = AutomationRule::new(TENANT, name, level, action);
        self.executor.upsert_rule(&rule).unwrap();
        rule
    }

    pub fn audit(&self) -> Vec<AuditLogEntry> {
        self.executor
            .audit_log(&AuditFilter::tenant(TENANT))
            .unwrap()
    }

    pub fn record(&self, id: uuid::Uuid) -> ExecutedActionRecord {
        self.executor.get_executed_action(id).unwrap().unwrap()
    }
}

fn build(
    config: &ExecutorConfig,
    rate_limit: &RateLimitConfig,
    store: Arc<dyn ActionStore>,
    clock: Arc<ManualClock>,
    actions: &Arc<RecordingHandler>,
    undos: &Arc<RecordingHandler>,
) -> Arc<Executor> {
    let executor =
        Executor::with_clock(config.clone(), rate_limit.clone(), store, clock).unwrap();
    for action_type in ActionType::ALL {
        executor.register_action_handler(action_type, actions.clone());
        executor.register_undo_handler(action_type, undos.clone());
    }
    Arc::new(executor)
}

pub fn tag(tag: &str) -> RuleAction {
    RuleAction::Tag {
        tag: tag.to_string(),
    }
}

pub fn reject() -> RuleAction {
    RuleAction::Reject {
        reason: Some("Missing required certification".to_string()),
        notify_candidate: true,
    }
}

pub fn rate_limit(max_actions_per_window: u32) -> RateLimitConfig {
    RateLimitConfig {
        max_actions_per_window,
        window_minutes: 60,
    }
}
