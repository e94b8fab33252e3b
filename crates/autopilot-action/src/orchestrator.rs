//! Action engine orchestrator.
//!
//! Coordinates the full pipeline for a fired rule: rate-limit admission,
//! autonomy routing, handler execution, approval resolution, retries, undo,
//! auditing, and completion events.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use autopilot_core::clock::{Clock, SystemClock};
use autopilot_core::config::{ExecutorConfig, MissingHandlerPolicy, RateLimitConfig};
use autopilot_core::events::ActionEvent;
use autopilot_core::types::{
    ActionStatus, ActionType, AuditLogEntry, AuditResult, AutomationRule, CandidateRuleData,
    ExecutedActionRecord, ExecutionMode, PendingApproval,
};
use autopilot_storage::{ActionStore, AuditFilter, RuleStat};

use crate::approval::ApprovalQueue;
use crate::audit::AuditLog;
use crate::error::{ExecutorError, RetryRefusal};
use crate::guard::InFlight;
use crate::handler::{ActionHandler, HandlerRegistry, UndoHandler};
use crate::policy::AutonomyPolicy;
use crate::rate_limit::{RateLimiter, RatePermit};
use crate::record::AttemptContext;
use crate::types::{ActionOutcome, RetryOutcome, UndoOutcome, RATE_LIMIT_EXCEEDED};
use crate::undo::UndoRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The action execution engine.
///
/// One instance per application, shared behind an `Arc`. All methods take
/// `&self`; no store lock is held while a handler runs.
pub struct Executor {
    config: RwLock<ExecutorConfig>,
    store: Arc<dyn ActionStore>,
    clock: Arc<dyn Clock>,
    handlers: HandlerRegistry,
    rate_limiter: RateLimiter,
    approvals: ApprovalQueue,
    undo: UndoRegistry,
    audit: AuditLog,
    retries_in_flight: InFlight,
    events: broadcast::Sender<ActionEvent>,
}

impl Executor {
    /// Create an executor on the system clock.
    pub fn new(
        config: ExecutorConfig,
        rate_limit: RateLimitConfig,
        store: Arc<dyn ActionStore>,
    ) -> Result<Self, ExecutorError> {
        Self::with_clock(config, rate_limit, store, Arc::new(SystemClock))
    }

    /// Create an executor with an explicit time source.
    ///
    /// The rate limiter is hydrated from executions already in the store, so
    /// a restart does not reset admission.
    pub fn with_clock(
        config: ExecutorConfig,
        rate_limit: RateLimitConfig,
        store: Arc<dyn ActionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        let rate_limiter = RateLimiter::new(rate_limit, Arc::clone(&clock));
        let since = clock.now() - rate_limiter.config().window();
        rate_limiter.hydrate(store.executions_since(since)?);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(
            undo_window_minutes = config.undo_window_minutes,
            max_actions_per_window = rate_limiter.config().max_actions_per_window,
            "Action executor started"
        );

        Ok(Self {
            audit: AuditLog::new(Arc::clone(&store), config.enable_audit_log),
            approvals: ApprovalQueue::new(Arc::clone(&store)),
            undo: UndoRegistry::new(Arc::clone(&store), Arc::clone(&clock)),
            config: RwLock::new(config),
            store,
            clock,
            handlers: HandlerRegistry::new(),
            rate_limiter,
            retries_in_flight: InFlight::new(),
            events,
        })
    }

    // ---- Configuration and registration ----

    pub fn get_config(&self) -> ExecutorConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration. An invalid configuration is rejected and
    /// the current one stays in force.
    pub fn update_config(&self, config: ExecutorConfig) -> Result<(), ExecutorError> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Executor configuration rejected");
            return Err(e.into());
        }
        self.audit.set_enabled(config.enable_audit_log);
        info!(
            undo_window_minutes = config.undo_window_minutes,
            max_retries = config.max_retries,
            "Executor configuration updated"
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn register_action_handler(&self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        self.handlers.register_action_handler(action_type, handler);
    }

    pub fn register_undo_handler(&self, action_type: ActionType, handler: Arc<dyn UndoHandler>) {
        self.handlers.register_undo_handler(action_type, handler);
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Completion events, published when `notify_on_complete` is set.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.events.subscribe()
    }

    // ---- Rules ----

    pub fn upsert_rule(&self, rule: &AutomationRule) -> Result<(), ExecutorError> {
        Ok(self.store.upsert_rule(rule)?)
    }

    pub fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, ExecutorError> {
        Ok(self.store.get_rule(id)?)
    }

    pub fn list_rules(&self, tenant_id: &str) -> Result<Vec<AutomationRule>, ExecutorError> {
        Ok(self.store.list_rules(tenant_id)?)
    }

    // ---- Orchestration ----

    /// Run a fired rule for a candidate.
    ///
    /// Every call appends exactly one audit entry (when auditing is on)
    /// whose result matches the returned status. A rule owned by another
    /// tenant is refused without running.
    pub async fn execute_action(
        &self,
        rule: &AutomationRule,
        candidate: &CandidateRuleData,
        tenant_id: &str,
        related_entity_id: Option<&str>,
        acting_user: Option<&str>,
    ) -> Result<ActionOutcome, ExecutorError> {
        let config = self.get_config();
        let ctx = AttemptContext::from_rule(
            rule,
            &candidate.id,
            tenant_id,
            related_entity_id,
            acting_user,
        );
        if rule.tenant_id != tenant_id {
            return self.refuse(&ctx, foreign_rule(rule.id, tenant_id));
        }
        let mode = AutonomyPolicy::with_ceiling(config.autonomy_ceiling)
            .determine_execution_status(rule.autonomy_level);
        debug!(
            tenant = %tenant_id,
            rule_id = %rule.id,
            candidate = %candidate.id,
            %mode,
            "Routing rule firing"
        );

        match mode {
            ExecutionMode::AutoExecute => match self.rate_limiter.try_acquire(tenant_id) {
                Some(permit) => self.perform(&ctx, Some(permit), &config).await,
                None => self.refuse(&ctx, RATE_LIMIT_EXCEEDED.to_string()),
            },
            ExecutionMode::RequireApproval => {
                if !self.rate_limiter.can_execute_action(tenant_id) {
                    return self.refuse(&ctx, RATE_LIMIT_EXCEEDED.to_string());
                }
                self.queue_for_approval(&ctx)
            }
            ExecutionMode::AdviseOnly => {
                if !self.rate_limiter.can_execute_action(tenant_id) {
                    return self.refuse(&ctx, RATE_LIMIT_EXCEEDED.to_string());
                }
                self.advise(&ctx)
            }
        }
    }

    /// Approve and execute a pending approval.
    ///
    /// Returns `None` if the approval is unknown, already resolved, or owned
    /// by another tenant.
    pub async fn execute_approved_action(
        &self,
        approval_id: Uuid,
        tenant_id: &str,
        acting_user: Option<&str>,
    ) -> Result<Option<ActionOutcome>, ExecutorError> {
        let Some(approval) = self.approvals.take(approval_id, tenant_id)? else {
            debug!(%approval_id, tenant = %tenant_id, "Approval not found");
            return Ok(None);
        };
        info!(%approval_id, tenant = %tenant_id, user = ?acting_user, "Approval granted");

        let config = self.get_config();
        let ctx = AttemptContext::from_approval(&approval, acting_user);
        match self.store.get_rule(approval.rule_id)? {
            Some(rule) if rule.tenant_id == approval.tenant_id => {}
            Some(_) => {
                let error = foreign_rule(approval.rule_id, &approval.tenant_id);
                return self.fail(&ctx, error).map(Some);
            }
            None => {
                let error = format!("rule {} no longer exists", approval.rule_id);
                return self.fail(&ctx, error).map(Some);
            }
        }
        // The human decision is the admission: no gate, but it still counts.
        self.perform(&ctx, None, &config).await.map(Some)
    }

    /// Reject a pending approval. Returns the discarded approval, or `None`
    /// if it is unknown, already resolved, or owned by another tenant.
    pub fn reject_approval(
        &self,
        approval_id: Uuid,
        tenant_id: &str,
        acting_user: Option<&str>,
    ) -> Result<Option<PendingApproval>, ExecutorError> {
        let Some(approval) = self.approvals.take(approval_id, tenant_id)? else {
            debug!(%approval_id, tenant = %tenant_id, "Approval not found");
            return Ok(None);
        };

        let now = self.clock.now();
        let ctx = AttemptContext::from_approval(&approval, acting_user);
        self.audit.log_to_audit(ctx.audit_entry(
            AuditResult::Rejected,
            now,
            approval.explanation.clone(),
            None,
        ))?;
        info!(%approval_id, tenant = %tenant_id, user = ?acting_user, "Approval rejected");
        self.publish(ActionEvent::ApprovalRejected {
            approval_id,
            tenant_id: approval.tenant_id.clone(),
            rejected_by: acting_user.map(str::to_string),
            timestamp: now,
        });
        Ok(Some(approval))
    }

    /// Re-attempt a failed action as a new record.
    ///
    /// Each failed record can be retried once; the chain is bounded by
    /// `max_retries`, so an action runs at most `1 + max_retries` times.
    pub async fn retry_action(
        &self,
        record_id: Uuid,
        tenant_id: &str,
        acting_user: Option<&str>,
    ) -> Result<RetryOutcome, ExecutorError> {
        let Some(_claim) = self.retries_in_flight.try_claim(record_id) else {
            return Ok(RetryOutcome::Refused(RetryRefusal::InProgress));
        };
        let record = match self.store.get_record(record_id)? {
            Some(record) if record.tenant_id == tenant_id => record,
            _ => return Ok(RetryOutcome::NotFound),
        };

        let config = self.get_config();
        if let Some(refusal) = self.check_retryable(&record, &config)? {
            warn!(%record_id, tenant = %tenant_id, %refusal, "Retry refused");
            return Ok(RetryOutcome::Refused(refusal));
        }

        let ctx = AttemptContext::retry_of(&record, acting_user);
        let Some(permit) = self.rate_limiter.try_acquire(tenant_id) else {
            self.refuse(&ctx, RATE_LIMIT_EXCEEDED.to_string())?;
            return Ok(RetryOutcome::Refused(RetryRefusal::RateLimited));
        };
        info!(%record_id, attempt = ctx.attempt, "Retrying failed action");
        let outcome = self.perform(&ctx, Some(permit), &config).await?;
        Ok(RetryOutcome::Retried(outcome))
    }

    fn check_retryable(
        &self,
        record: &ExecutedActionRecord,
        config: &ExecutorConfig,
    ) -> Result<Option<RetryRefusal>, ExecutorError> {
        if record.status != ActionStatus::Failed {
            return Ok(Some(RetryRefusal::NotFailed(record.status)));
        }
        if record.attempt > config.max_retries {
            return Ok(Some(RetryRefusal::RetriesExhausted {
                attempts: record.attempt,
                max_retries: config.max_retries,
            }));
        }
        if let Some(retry) = self.store.find_retry_of(record.id)? {
            return Ok(Some(RetryRefusal::AlreadyRetried(retry.id)));
        }
        let rule = match self.store.get_rule(record.rule_id)? {
            Some(rule) if rule.tenant_id == record.tenant_id => rule,
            _ => return Ok(Some(RetryRefusal::RuleNotFound(record.rule_id))),
        };
        // Human-approved actions keep their approval; the rest must still be
        // allowed to run unattended.
        if record.approval_id.is_none() {
            let policy = AutonomyPolicy::with_ceiling(config.autonomy_ceiling);
            let level = policy.effective_level(rule.autonomy_level);
            if policy.determine_execution_status(rule.autonomy_level) != ExecutionMode::AutoExecute {
                return Ok(Some(RetryRefusal::NotAutonomous(level)));
            }
        }
        Ok(None)
    }

    /// Invoke the handler and write the resulting record.
    ///
    /// The undo deadline is checked first: a record that cannot be stored
    /// must not follow a side effect.
    async fn perform(
        &self,
        ctx: &AttemptContext,
        permit: Option<RatePermit<'_>>,
        config: &ExecutorConfig,
    ) -> Result<ActionOutcome, ExecutorError> {
        let action_type = ctx.action.action_type();
        if let Err(e) = config.undo_deadline(self.clock.now()) {
            drop(permit);
            return self.fail(ctx, format!("undo window out of range: {}", e));
        }
        let result = match self.handlers.action_handler(action_type) {
            Some(handler) => handler
                .execute(
                    &ctx.action,
                    &ctx.candidate_id,
                    ctx.related_entity_id.as_deref(),
                )
                .await
                .map_err(|e| e.to_string()),
            None => match config.missing_handler {
                MissingHandlerPolicy::DryRun => {
                    info!(
                        %action_type,
                        candidate = %ctx.candidate_id,
                        "No handler registered; dry-run policy treats the action as a no-op"
                    );
                    Ok(())
                }
                MissingHandlerPolicy::Fail => Err(format!(
                    "no handler registered for action type '{}'",
                    action_type
                )),
            },
        };

        if let Err(error) = result {
            drop(permit);
            return self.fail(ctx, error);
        }

        match permit {
            Some(permit) => permit.commit(),
            None => self.rate_limiter.increment_action_count(&ctx.tenant_id),
        }
        let record = ctx.executed(self.clock.now(), config.undo_window());
        self.store.insert_record(&record)?;
        self.store.increment_rule_stat(ctx.rule_id, RuleStat::Executed)?;
        self.audit.log_to_audit(ctx.audit_for(&record))?;
        info!(
            tenant = %ctx.tenant_id,
            rule_id = %ctx.rule_id,
            record_id = %record.id,
            %action_type,
            attempt = ctx.attempt,
            "Action executed"
        );
        self.publish(ActionEvent::ActionExecuted {
            record_id: record.id,
            tenant_id: record.tenant_id.clone(),
            rule_id: record.rule_id,
            action_type,
            undo_deadline: record.undo_deadline,
            timestamp: record.timestamp,
        });
        Ok(ActionOutcome::from_record(&record))
    }

    fn fail(&self, ctx: &AttemptContext, error: String) -> Result<ActionOutcome, ExecutorError> {
        let record = ctx.failed(self.clock.now(), error);
        self.store.insert_record(&record)?;
        self.audit.log_to_audit(ctx.audit_for(&record))?;
        warn!(
            tenant = %ctx.tenant_id,
            rule_id = %ctx.rule_id,
            record_id = %record.id,
            action_type = %record.action_type(),
            error = record.error.as_deref().unwrap_or_default(),
            "Action failed"
        );
        self.publish(ActionEvent::ActionFailed {
            record_id: Some(record.id),
            tenant_id: record.tenant_id.clone(),
            rule_id: record.rule_id,
            action_type: record.action_type(),
            error: record.error.clone().unwrap_or_default(),
            timestamp: record.timestamp,
        });
        Ok(ActionOutcome::from_record(&record))
    }

    /// Fail an attempt before any handler or record: audited, no record.
    fn refuse(&self, ctx: &AttemptContext, error: String) -> Result<ActionOutcome, ExecutorError> {
        let now = self.clock.now();
        self.audit.log_to_audit(ctx.audit_entry(
            AuditResult::Failed,
            now,
            error.clone(),
            Some(error.clone()),
        ))?;
        warn!(
            tenant = %ctx.tenant_id,
            rule_id = %ctx.rule_id,
            candidate = %ctx.candidate_id,
            %error,
            "Action refused"
        );
        self.publish(ActionEvent::ActionFailed {
            record_id: None,
            tenant_id: ctx.tenant_id.clone(),
            rule_id: ctx.rule_id,
            action_type: ctx.action.action_type(),
            error: error.clone(),
            timestamp: now,
        });
        Ok(ActionOutcome::refused(error))
    }

    fn queue_for_approval(&self, ctx: &AttemptContext) -> Result<ActionOutcome, ExecutorError> {
        let (record, approval) = ctx.queued(self.clock.now());
        self.approvals.enqueue(&record, &approval)?;
        self.audit.log_to_audit(ctx.audit_for(&record))?;
        info!(
            tenant = %ctx.tenant_id,
            rule_id = %ctx.rule_id,
            record_id = %record.id,
            approval_id = %approval.id,
            "Action queued for approval"
        );
        self.publish(ActionEvent::ApprovalRequested {
            approval_id: approval.id,
            record_id: record.id,
            tenant_id: record.tenant_id.clone(),
            rule_id: record.rule_id,
            timestamp: record.timestamp,
        });
        Ok(ActionOutcome::from_record(&record))
    }

    fn advise(&self, ctx: &AttemptContext) -> Result<ActionOutcome, ExecutorError> {
        let record = ctx.advised(self.clock.now());
        self.store.insert_record(&record)?;
        self.audit.log_to_audit(ctx.audit_for(&record))?;
        info!(
            tenant = %ctx.tenant_id,
            rule_id = %ctx.rule_id,
            record_id = %record.id,
            "Action advised"
        );
        self.publish(ActionEvent::ActionAdvised {
            record_id: record.id,
            tenant_id: record.tenant_id.clone(),
            rule_id: record.rule_id,
            timestamp: record.timestamp,
        });
        Ok(ActionOutcome::from_record(&record))
    }

    fn publish(&self, event: ActionEvent) {
        if !self.get_config().notify_on_complete {
            return;
        }
        if self.events.send(event).is_err() {
            debug!("Completion event dropped: no subscribers");
        }
    }

    // ---- Undo ----

    pub async fn undo_action(
        &self,
        record_id: Uuid,
        acting_user: Option<&str>,
    ) -> Result<UndoOutcome, ExecutorError> {
        let outcome = self.undo.undo(record_id, acting_user, &self.handlers).await?;
        match &outcome {
            UndoOutcome::Undone(record) => {
                let undone_at = record.undone_at.unwrap_or_else(|| self.clock.now());
                self.store.increment_rule_stat(record.rule_id, RuleStat::Undone)?;
                self.audit.log_undo_to_audit(record, acting_user, undone_at)?;
                info!(
                    tenant = %record.tenant_id,
                    rule_id = %record.rule_id,
                    %record_id,
                    user = ?acting_user,
                    "Action undone"
                );
                self.publish(ActionEvent::ActionUndone {
                    record_id,
                    tenant_id: record.tenant_id.clone(),
                    undone_by: acting_user.map(str::to_string),
                    timestamp: undone_at,
                });
            }
            UndoOutcome::NotFound => debug!(%record_id, "Undo target not found"),
            UndoOutcome::Refused(refusal) => warn!(%record_id, %refusal, "Undo refused"),
        }
        Ok(outcome)
    }

    pub fn can_undo_action(&self, record_id: Uuid) -> Result<bool, ExecutorError> {
        Ok(self.undo.can_undo_action(record_id)?)
    }

    pub fn get_undo_time_remaining(&self, record_id: Uuid) -> Result<Option<Duration>, ExecutorError> {
        Ok(self.undo.get_undo_time_remaining(record_id)?)
    }

    // ---- Queries ----

    pub fn get_executed_action(
        &self,
        record_id: Uuid,
    ) -> Result<Option<ExecutedActionRecord>, ExecutorError> {
        Ok(self.store.get_record(record_id)?)
    }

    pub fn list_executed_actions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ExecutedActionRecord>, ExecutorError> {
        Ok(self.store.list_records(tenant_id)?)
    }

    pub fn list_undoable_actions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ExecutedActionRecord>, ExecutorError> {
        Ok(self.undo.list_undoable(tenant_id)?)
    }

    pub fn list_pending_approvals(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<PendingApproval>, ExecutorError> {
        Ok(self.approvals.list(tenant_id)?)
    }

    pub fn audit_log(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, ExecutorError> {
        Ok(self.audit.list(filter)?)
    }
}

fn foreign_rule(rule_id: Uuid, tenant_id: &str) -> String {
    format!("rule {} does not belong to tenant '{}'", rule_id, tenant_id)
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.get_config())
            .field("handlers", &self.handlers)
            .field("rate_limiter", &self.rate_limiter)
            .field("audit", &self.audit)
            .finish()
    }
}
