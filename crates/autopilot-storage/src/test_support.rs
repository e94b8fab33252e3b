//! Conformance checks shared by every [`ActionStore`] backend.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use autopilot_core::types::{
    ActionStatus, ActionType, AuditLogEntry, AuditResult, AutomationRule, AutonomyLevel,
    ExecutedActionRecord, PendingApproval, RuleAction,
};

use crate::store::{ActionStore, AuditFilter, RuleStat};

// ---- Fixtures ----

pub fn rule(tenant_id: &str, name: &str) -> AutomationRule {
    AutomationRule::new(
        tenant_id,
        name,
        AutonomyLevel::Autonomous,
        RuleAction::Tag {
            tag: "shortlist".to_string(),
        },
    )
}

pub fn executed(
    rule: &AutomationRule,
    candidate_id: &str,
    at: DateTime<Utc>,
    undo_deadline: Option<DateTime<Utc>>,
) -> ExecutedActionRecord {
    ExecutedActionRecord {
        id: Uuid::new_v4(),
        tenant_id: rule.tenant_id.clone(),
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        candidate_id: candidate_id.to_string(),
        related_entity_id: Some("job-7".to_string()),
        action: rule.action.clone(),
        status: ActionStatus::Executed,
        explanation: rule.explain(),
        timestamp: at,
        can_undo: undo_deadline.is_some(),
        undo_deadline,
        undone_at: None,
        undone_by: None,
        error: None,
        approval_id: None,
        attempt: 1,
        retry_of: None,
    }
}

pub fn failed(rule: &AutomationRule, candidate_id: &str, at: DateTime<Utc>) -> ExecutedActionRecord {
    ExecutedActionRecord {
        status: ActionStatus::Failed,
        error: Some("mail server unavailable".to_string()),
        ..executed(rule, candidate_id, at, None)
    }
}

pub fn queued(
    rule: &AutomationRule,
    candidate_id: &str,
    at: DateTime<Utc>,
) -> (ExecutedActionRecord, PendingApproval) {
    let approval = PendingApproval {
        id: Uuid::new_v4(),
        tenant_id: rule.tenant_id.clone(),
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        candidate_id: candidate_id.to_string(),
        related_entity_id: None,
        action: rule.action.clone(),
        explanation: rule.explain(),
        requested_by: Some("recruiter-1".to_string()),
        created_at: at,
    };
    let record = ExecutedActionRecord {
        status: ActionStatus::PendingApproval,
        approval_id: Some(approval.id),
        related_entity_id: None,
        ..executed(rule, candidate_id, at, None)
    };
    (record, approval)
}

pub fn audit(tenant_id: &str, candidate_id: &str, at: DateTime<Utc>) -> AuditLogEntry {
    AuditLogEntry {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        user_id: None,
        action_type: ActionType::Tag,
        rule_id: Uuid::new_v4(),
        rule_name: "R".to_string(),
        candidate_id: candidate_id.to_string(),
        related_entity_id: None,
        params: serde_json::json!({"tag": "shortlist"}),
        result: AuditResult::Executed,
        explanation: "Rule 'R': Tag candidate".to_string(),
        error: None,
        timestamp: at,
        undone_by: None,
        undone_at: None,
        record_id: None,
        approval_id: None,
    }
}

// ---- Checks ----

pub fn rules_crud(store: &dyn ActionStore) {
    let mut first = rule("t1", "First");
    let second = rule("t1", "Second");
    let other = rule("t2", "Other tenant");
    for r in [&first, &second, &other] {
        store.upsert_rule(r).unwrap();
    }

    assert_eq!(store.get_rule(first.id).unwrap().as_ref(), Some(&first));
    let names: Vec<_> = store
        .list_rules("t1")
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["First", "Second"]);

    first.name = "Renamed".to_string();
    first.autonomy_level = AutonomyLevel::Supervised;
    store.upsert_rule(&first).unwrap();
    assert_eq!(store.get_rule(first.id).unwrap(), Some(first.clone()));
    assert_eq!(store.list_rules("t1").unwrap().len(), 2);

    store.increment_rule_stat(first.id, RuleStat::Executed).unwrap();
    store.increment_rule_stat(first.id, RuleStat::Executed).unwrap();
    store.increment_rule_stat(first.id, RuleStat::Undone).unwrap();
    store.increment_rule_stat(Uuid::new_v4(), RuleStat::Executed).unwrap();
    let stats = store.get_rule(first.id).unwrap().unwrap();
    assert_eq!((stats.executed, stats.undone), (2, 1));

    assert!(store.delete_rule(second.id).unwrap());
    assert!(!store.delete_rule(second.id).unwrap());
    assert!(store.get_rule(second.id).unwrap().is_none());
}

pub fn records_listing(store: &dyn ActionStore) {
    let now = Utc::now();
    let r = rule("t1", "R");
    let old = executed(&r, "c1", now - Duration::hours(2), Some(now - Duration::hours(1)));
    let live = executed(&r, "c2", now - Duration::minutes(5), Some(now + Duration::minutes(25)));
    let fail = failed(&r, "c3", now - Duration::minutes(1));
    let foreign = executed(&rule("t2", "R"), "c9", now, Some(now + Duration::minutes(30)));
    for record in [&old, &live, &fail, &foreign] {
        store.insert_record(record).unwrap();
    }

    assert_eq!(store.get_record(fail.id).unwrap(), Some(fail.clone()));
    assert!(store.get_record(Uuid::new_v4()).unwrap().is_none());

    let ids: Vec<_> = store.list_records("t1").unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![fail.id, live.id, old.id]);

    let undoable: Vec<_> = store
        .list_undoable("t1", now)
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(undoable, vec![live.id]);

    // The deadline itself is still inside the window.
    let at_deadline = store
        .list_undoable("t1", now + Duration::minutes(25))
        .unwrap();
    assert_eq!(at_deadline.len(), 1);
    assert!(store
        .list_undoable("t1", now + Duration::minutes(26))
        .unwrap()
        .is_empty());
}

pub fn mark_undone_once(store: &dyn ActionStore) {
    let now = Utc::now();
    let r = rule("t1", "R");
    let record = executed(&r, "c1", now, Some(now + Duration::minutes(30)));
    let not_undoable = executed(&r, "c2", now, None);
    store.insert_record(&record).unwrap();
    store.insert_record(&not_undoable).unwrap();

    let undone_at = now + Duration::minutes(1);
    let updated = store
        .mark_undone(record.id, undone_at, Some("recruiter-1"))
        .unwrap()
        .expect("first undo succeeds");
    assert_eq!(updated.status, ActionStatus::Undone);
    assert!(!updated.can_undo);
    assert_eq!(updated.undone_at, Some(undone_at));
    assert_eq!(updated.undone_by.as_deref(), Some("recruiter-1"));
    assert_eq!(store.get_record(record.id).unwrap(), Some(updated));

    assert!(store.mark_undone(record.id, undone_at, None).unwrap().is_none());
    assert!(store.mark_undone(not_undoable.id, undone_at, None).unwrap().is_none());
    assert!(store.mark_undone(Uuid::new_v4(), undone_at, None).unwrap().is_none());
}

pub fn take_approval_once(store: &dyn ActionStore) {
    let now = Utc::now();
    let r = rule("t1", "R");
    let (record_a, approval_a) = queued(&r, "c1", now);
    let (record_b, approval_b) = queued(&r, "c2", now + Duration::seconds(1));
    store.queue_approval(&record_b, &approval_b).unwrap();
    store.queue_approval(&record_a, &approval_a).unwrap();

    assert_eq!(
        store.get_record(record_a.id).unwrap().map(|r| r.status),
        Some(ActionStatus::PendingApproval)
    );
    let ids: Vec<_> = store.list_approvals(None).unwrap().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![approval_a.id, approval_b.id]);

    assert_eq!(
        store.take_approval(approval_a.id, "t1").unwrap(),
        Some(approval_a.clone())
    );
    assert!(store.take_approval(approval_a.id, "t1").unwrap().is_none());
    assert_eq!(store.list_approvals(Some("t1")).unwrap(), vec![approval_b]);
}

pub fn approval_tenant_isolation(store: &dyn ActionStore) {
    let now = Utc::now();
    let (record, approval) = queued(&rule("t1", "R"), "c1", now);
    let (other_record, other_approval) = queued(&rule("t2", "R"), "c1", now);
    store.queue_approval(&record, &approval).unwrap();
    store.queue_approval(&other_record, &other_approval).unwrap();

    assert!(store.take_approval(approval.id, "t2").unwrap().is_none());
    assert_eq!(store.list_approvals(Some("t1")).unwrap(), vec![approval.clone()]);
    assert_eq!(store.list_approvals(Some("t2")).unwrap(), vec![other_approval]);
    assert_eq!(store.list_approvals(None).unwrap().len(), 2);
    assert!(store.take_approval(approval.id, "t1").unwrap().is_some());
}

pub fn audit_filters(store: &dyn ActionStore) {
    let now = Utc::now();
    let first = audit("t1", "c1", now - Duration::minutes(3));
    let second = AuditLogEntry {
        result: AuditResult::Rejected,
        user_id: Some("recruiter-1".to_string()),
        approval_id: Some(Uuid::new_v4()),
        ..audit("t1", "c2", now - Duration::minutes(2))
    };
    let third = AuditLogEntry {
        result: AuditResult::Undone,
        undone_by: Some("recruiter-2".to_string()),
        undone_at: Some(now),
        record_id: Some(Uuid::new_v4()),
        ..audit("t1", "c1", now - Duration::minutes(1))
    };
    let foreign = audit("t2", "c1", now);
    for entry in [&first, &second, &third, &foreign] {
        store.append_audit(entry).unwrap();
    }

    assert_eq!(
        store.list_audit(&AuditFilter::tenant("t1")).unwrap(),
        vec![third.clone(), second.clone(), first.clone()]
    );
    assert_eq!(
        store.list_audit(&AuditFilter::candidate("c1")).unwrap(),
        vec![foreign.clone(), third.clone(), first.clone()]
    );
    let both = AuditFilter {
        tenant_id: Some("t1".to_string()),
        candidate_id: Some("c1".to_string()),
        limit: None,
    };
    assert_eq!(store.list_audit(&both).unwrap(), vec![third.clone(), first]);
    assert_eq!(
        store.list_audit(&AuditFilter::tenant("t1").with_limit(1)).unwrap(),
        vec![third]
    );
    assert_eq!(store.list_audit(&AuditFilter::default()).unwrap().len(), 4);
}

pub fn executions_since(store: &dyn ActionStore) {
    let now = Utc::now();
    let r = rule("t1", "R");
    let stale = executed(&r, "c1", now - Duration::hours(2), None);
    let recent = executed(&r, "c2", now - Duration::minutes(10), Some(now + Duration::minutes(20)));
    let fail = failed(&r, "c3", now - Duration::minutes(5));
    let (pending, approval) = queued(&r, "c4", now - Duration::minutes(4));
    for record in [&stale, &recent, &fail] {
        store.insert_record(record).unwrap();
    }
    store.queue_approval(&pending, &approval).unwrap();
    store
        .mark_undone(recent.id, now - Duration::minutes(1), None)
        .unwrap()
        .expect("recent record is undoable");

    let since = store.executions_since(now - Duration::hours(1)).unwrap();
    assert_eq!(since, vec![("t1".to_string(), recent.timestamp)]);
}

pub fn find_retry_of(store: &dyn ActionStore) {
    let now = Utc::now();
    let r = rule("t1", "R");
    let original = failed(&r, "c1", now);
    store.insert_record(&original).unwrap();
    assert!(store.find_retry_of(original.id).unwrap().is_none());

    let retry = ExecutedActionRecord {
        attempt: 2,
        retry_of: Some(original.id),
        ..executed(&r, "c1", now + Duration::seconds(5), None)
    };
    store.insert_record(&retry).unwrap();
    assert_eq!(store.find_retry_of(original.id).unwrap(), Some(retry));
}
