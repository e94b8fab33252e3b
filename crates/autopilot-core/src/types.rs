//! Core domain types for the action engine.
//!
//! Defines rules, actions, lifecycle records, approvals, and audit entries,
//! together with their supporting enumerations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// How much trust a rule is granted to act on its own.
///
/// Ordered from least to most trusted, so a ceiling can be applied with `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Record a suggestion, never act.
    Advisory,
    /// Queue the action for a human to approve.
    Supervised,
    /// Act immediately.
    Autonomous,
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutonomyLevel::Advisory => write!(f, "advisory"),
            AutonomyLevel::Supervised => write!(f, "supervised"),
            AutonomyLevel::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advisory" => Ok(AutonomyLevel::Advisory),
            "supervised" => Ok(AutonomyLevel::Supervised),
            "autonomous" => Ok(AutonomyLevel::Autonomous),
            _ => Err(format!("Unknown autonomy level: {}", s)),
        }
    }
}

/// What the autonomy policy decided to do with a rule firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    AutoExecute,
    RequireApproval,
    AdviseOnly,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::AutoExecute => write!(f, "auto_execute"),
            ExecutionMode::RequireApproval => write!(f, "require_approval"),
            ExecutionMode::AdviseOnly => write!(f, "advise_only"),
        }
    }
}

/// Action types, one handler (and optionally one undo handler) each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Invite,
    Clarify,
    Reject,
    Notify,
    PauseListing,
    Tag,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::Invite,
        ActionType::Clarify,
        ActionType::Reject,
        ActionType::Notify,
        ActionType::PauseListing,
        ActionType::Tag,
    ];

    /// Human-readable label used in explanations.
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::Invite => "Invite candidate",
            ActionType::Clarify => "Request clarification",
            ActionType::Reject => "Reject candidate",
            ActionType::Notify => "Notify team",
            ActionType::PauseListing => "Pause listing",
            ActionType::Tag => "Tag candidate",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Invite => write!(f, "invite"),
            ActionType::Clarify => write!(f, "clarify"),
            ActionType::Reject => write!(f, "reject"),
            ActionType::Notify => write!(f, "notify"),
            ActionType::PauseListing => write!(f, "pause_listing"),
            ActionType::Tag => write!(f, "tag"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invite" => Ok(ActionType::Invite),
            "clarify" => Ok(ActionType::Clarify),
            "reject" => Ok(ActionType::Reject),
            "notify" => Ok(ActionType::Notify),
            "pause_listing" => Ok(ActionType::PauseListing),
            "tag" => Ok(ActionType::Tag),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

/// Lifecycle status of an [`ExecutedActionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Executed,
    PendingApproval,
    Advised,
    Undone,
    Failed,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Executed => write!(f, "executed"),
            ActionStatus::PendingApproval => write!(f, "pending_approval"),
            ActionStatus::Advised => write!(f, "advised"),
            ActionStatus::Undone => write!(f, "undone"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(ActionStatus::Executed),
            "pending_approval" => Ok(ActionStatus::PendingApproval),
            "advised" => Ok(ActionStatus::Advised),
            "undone" => Ok(ActionStatus::Undone),
            "failed" => Ok(ActionStatus::Failed),
            _ => Err(format!("Unknown action status: {}", s)),
        }
    }
}

/// Result recorded on an audit entry: every record status plus `rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Executed,
    PendingApproval,
    Advised,
    Failed,
    Undone,
    Rejected,
}

impl From<ActionStatus> for AuditResult {
    fn from(status: ActionStatus) -> Self {
        match status {
            ActionStatus::Executed => AuditResult::Executed,
            ActionStatus::PendingApproval => AuditResult::PendingApproval,
            ActionStatus::Advised => AuditResult::Advised,
            ActionStatus::Undone => AuditResult::Undone,
            ActionStatus::Failed => AuditResult::Failed,
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditResult::Executed => write!(f, "executed"),
            AuditResult::PendingApproval => write!(f, "pending_approval"),
            AuditResult::Advised => write!(f, "advised"),
            AuditResult::Failed => write!(f, "failed"),
            AuditResult::Undone => write!(f, "undone"),
            AuditResult::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for AuditResult {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(AuditResult::Executed),
            "pending_approval" => Ok(AuditResult::PendingApproval),
            "advised" => Ok(AuditResult::Advised),
            "failed" => Ok(AuditResult::Failed),
            "undone" => Ok(AuditResult::Undone),
            "rejected" => Ok(AuditResult::Rejected),
            _ => Err(format!("Unknown audit result: {}", s)),
        }
    }
}

// =============================================================================
// Rules and actions
// =============================================================================

/// The action a rule performs, with parameters typed per action kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Invite {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        slot_ids: Vec<String>,
    },
    Clarify {
        question: String,
    },
    Reject {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        notify_candidate: bool,
    },
    Notify {
        #[serde(default)]
        recipients: Vec<String>,
        message: String,
    },
    PauseListing {
        #[serde(default)]
        listing_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Tag {
        tag: String,
    },
}

impl RuleAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            RuleAction::Invite { .. } => ActionType::Invite,
            RuleAction::Clarify { .. } => ActionType::Clarify,
            RuleAction::Reject { .. } => ActionType::Reject,
            RuleAction::Notify { .. } => ActionType::Notify,
            RuleAction::PauseListing { .. } => ActionType::PauseListing,
            RuleAction::Tag { .. } => ActionType::Tag,
        }
    }

    /// `"Rule '<rule_name>': <label>"`.
    pub fn explain_for(&self, rule_name: &str) -> String {
        format!("Rule '{}': {}", rule_name, self.action_type().label())
    }

    /// Parameter snapshot without the type tag, as stored in the audit log.
    pub fn params(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("type");
        }
        value
    }
}

/// A tenant-owned automation rule as seen by the engine.
///
/// Only `executed` and `undone` are written by the engine; everything else
/// belongs to rule authoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub autonomy_level: AutonomyLevel,
    pub action: RuleAction,
    #[serde(default)]
    pub executed: u64,
    #[serde(default)]
    pub undone: u64,
}

impl AutomationRule {
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        autonomy_level: AutonomyLevel,
        action: RuleAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            autonomy_level,
            action,
            executed: 0,
            undone: 0,
        }
    }

    pub fn explain(&self) -> String {
        self.action.explain_for(&self.name)
    }
}

/// The subject a rule fired for. Only the identity is meaningful here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRuleData {
    pub id: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl CandidateRuleData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: serde_json::Value::Null,
        }
    }
}

// =============================================================================
// Lifecycle entities
// =============================================================================

/// One orchestration attempt and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedActionRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub candidate_id: String,
    pub related_entity_id: Option<String>,
    pub action: RuleAction,
    pub status: ActionStatus,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
    pub can_undo: bool,
    pub undo_deadline: Option<DateTime<Utc>>,
    pub undone_at: Option<DateTime<Utc>>,
    pub undone_by: Option<String>,
    pub error: Option<String>,
    /// Approval this record was queued under or executed from.
    pub approval_id: Option<Uuid>,
    /// 1 for a first attempt, incremented by each retry.
    pub attempt: u32,
    /// The failed record this one re-attempts.
    pub retry_of: Option<Uuid>,
}

impl ExecutedActionRecord {
    pub fn action_type(&self) -> ActionType {
        self.action.action_type()
    }

    /// Whether the record can still be reversed at `now`.
    pub fn is_undoable_at(&self, now: DateTime<Utc>) -> bool {
        self.can_undo
            && self.status == ActionStatus::Executed
            && self.undo_deadline.map_or(true, |deadline| now <= deadline)
    }

    /// Time left in the undo window, floored at zero. `None` if not undoable.
    pub fn undo_time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.can_undo || self.status != ActionStatus::Executed {
            return None;
        }
        let deadline = self.undo_deadline?;
        Some((deadline - now).max(Duration::zero()))
    }
}

/// An action waiting for a human to approve or reject it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub tenant_id: String,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub candidate_id: String,
    pub related_entity_id: Option<String>,
    pub action: RuleAction,
    pub explanation: String,
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An immutable audit fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub action_type: ActionType,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub candidate_id: String,
    pub related_entity_id: Option<String>,
    pub params: serde_json::Value,
    pub result: AuditResult,
    pub explanation: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub undone_by: Option<String>,
    pub undone_at: Option<DateTime<Utc>>,
    pub record_id: Option<Uuid>,
    pub approval_id: Option<Uuid>,
}

// =============================================================================
// Tests
// =============================================================================
