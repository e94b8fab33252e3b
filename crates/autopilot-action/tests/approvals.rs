//! Approval resolution: consumed once, tenant-scoped, rejections audited.

mod common;

use autopilot_core::types::{ActionStatus, AuditResult, AutonomyLevel, CandidateRuleData};

use autopilot_storage::AuditFilter;

use common::{reject, tag, Backend, Harness, TENANT};

async fn queue_one(h: &Harness) -> uuid::Uuid {
    let rule = h.rule("Missing cert", AutonomyLevel::Supervised, reject());
    h.executor
        .execute_action(&rule, &CandidateRuleData::new("cand-2"), TENANT, None, None)
        .await
        .unwrap()
        .approval_id
        .unwrap()
}

#[tokio::test]
async fn test_approval_is_consumed_once() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let approval_id = queue_one(&h).await;

        let first = h
            .executor
            .execute_approved_action(approval_id, TENANT, Some("dana"))
            .await
            .unwrap();
        let second = h
            .executor
            .execute_approved_action(approval_id, TENANT, Some("dana"))
            .await
            .unwrap();

        assert_eq!(first.map(|o| o.status), Some(ActionStatus::Executed), "{:?}", backend);
        assert!(second.is_none());
        assert_eq!(h.actions.call_count(), 1);
        assert!(h
            .executor
            .reject_approval(approval_id, TENANT, Some("dana"))
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn test_concurrent_approvals_execute_once() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let approval_id = queue_one(&h).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let executor = h.executor.clone();
                tokio::spawn(async move {
                    executor
                        .execute_approved_action(approval_id, TENANT, None)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut resolved = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                resolved += 1;
            }
        }
        assert_eq!(resolved, 1, "{:?}", backend);
        assert_eq!(h.actions.call_count(), 1);
    }
}

#[tokio::test]
async fn test_other_tenant_cannot_see_or_consume() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let approval_id = queue_one(&h).await;

        assert!(h
            .executor
            .execute_approved_action(approval_id, "globex", Some("mallory"))
            .await
            .unwrap()
            .is_none());
        assert!(h
            .executor
            .reject_approval(approval_id, "globex", Some("mallory"))
            .unwrap()
            .is_none());
        assert!(h.executor.list_pending_approvals(Some("globex")).unwrap().is_empty());

        // Still live for its owner.
        assert_eq!(h.executor.list_pending_approvals(None).unwrap().len(), 1);
        assert!(h
            .executor
            .execute_approved_action(approval_id, TENANT, Some("dana"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(h.actions.call_count(), 1, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_other_tenant_cannot_fire_rule() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let auto = h.rule("Strong fit", AutonomyLevel::Autonomous, tag("strong-fit"));
        let supervised = h.rule("Missing cert", AutonomyLevel::Supervised, reject());

        for rule in [&auto, &supervised] {
            let outcome = h
                .executor
                .execute_action(
                    rule,
                    &CandidateRuleData::new("cand-1"),
                    "globex",
                    None,
                    Some("mallory"),
                )
                .await
                .unwrap();
            assert_eq!(outcome.status, ActionStatus::Failed, "{:?}", backend);
            assert!(outcome.record_id.is_none());
            assert!(outcome.approval_id.is_none());
            assert_eq!(
                outcome.error,
                Some(format!("rule {} does not belong to tenant 'globex'", rule.id))
            );
        }

        assert_eq!(h.actions.call_count(), 0);
        assert!(h.executor.list_pending_approvals(None).unwrap().is_empty());
        assert!(h.executor.list_executed_actions("globex").unwrap().is_empty());
        let owner = h.executor.get_rule(auto.id).unwrap().unwrap();
        assert_eq!(owner.executed, 0);
        assert!(h.audit().is_empty());
        let refused = h
            .executor
            .audit_log(&AuditFilter::tenant("globex"))
            .unwrap();
        assert_eq!(refused.len(), 2);
        assert!(refused.iter().all(|e| e.result == AuditResult::Failed));
    }
}

#[tokio::test]
async fn test_approval_fails_when_rule_changes_tenant() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let mut rule = h.rule("Missing cert", AutonomyLevel::Supervised, reject());
        let approval_id = h
            .executor
            .execute_action(&rule, &CandidateRuleData::new("cand-2"), TENANT, None, None)
            .await
            .unwrap()
            .approval_id
            .unwrap();

        rule.tenant_id = "globex".to_string();
        h.executor.upsert_rule(&rule).unwrap();

        let outcome = h
            .executor
            .execute_approved_action(approval_id, TENANT, Some("dana"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, ActionStatus::Failed, "{:?}", backend);
        assert_eq!(
            outcome.error,
            Some(format!("rule {} does not belong to tenant '{}'", rule.id, TENANT))
        );
        assert_eq!(h.actions.call_count(), 0);
        assert_eq!(h.executor.get_rule(rule.id).unwrap().unwrap().executed, 0);
        assert_eq!(h.record(outcome.record_id.unwrap()).tenant_id, TENANT);
    }
}

#[tokio::test]
async fn test_rejection_discards_and_audits() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let approval_id = queue_one(&h).await;

        let rejected = h
            .executor
            .reject_approval(approval_id, TENANT, Some("dana"))
            .unwrap()
            .unwrap();
        assert_eq!(rejected.id, approval_id);
        assert!(h.executor.list_pending_approvals(Some(TENANT)).unwrap().is_empty());
        assert!(h
            .executor
            .execute_approved_action(approval_id, TENANT, Some("dana"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.actions.call_count(), 0, "{:?}", backend);

        let audit = h.audit();
        assert_eq!(audit[0].result, AuditResult::Rejected);
        assert_eq!(audit[0].user_id.as_deref(), Some("dana"));
        assert_eq!(audit[0].approval_id, Some(approval_id));
        assert_eq!(audit[0].candidate_id, "cand-2");
    }
}

#[tokio::test]
async fn test_deleted_rule_fails_the_approved_attempt() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let rule = h.rule("Missing cert", AutonomyLevel::Supervised, reject());
        let queued = h
            .executor
            .execute_action(&rule, &CandidateRuleData::new("cand-2"), TENANT, None, None)
            .await
            .unwrap();
        assert!(h.store.delete_rule(rule.id).unwrap());

        let outcome = h
            .executor
            .execute_approved_action(queued.approval_id.unwrap(), TENANT, Some("dana"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.status, ActionStatus::Failed, "{:?}", backend);
        assert_eq!(
            outcome.error,
            Some(format!("rule {} no longer exists", rule.id))
        );
        assert_eq!(h.actions.call_count(), 0);
        assert_eq!(h.audit()[0].result, AuditResult::Failed);
        assert_eq!(h.record(outcome.record_id.unwrap()).status, ActionStatus::Failed);
    }
}

#[tokio::test]
async fn test_approved_handler_failure_is_recorded() {
    for backend in Backend::ALL {
        let h = Harness::new(backend);
        let approval_id = queue_one(&h).await;
        h.actions.fail_with("ATS rejected the status change");

        let outcome = h
            .executor
            .execute_approved_action(approval_id, TENANT, Some("dana"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.status, ActionStatus::Failed, "{:?}", backend);
        assert_eq!(outcome.error.as_deref(), Some("ATS rejected the status change"));
        assert_eq!(h.executor.rate_limiter().current_count(TENANT), 0);
        let record = h.record(outcome.record_id.unwrap());
        assert_eq!(record.approval_id, Some(approval_id));
    }
}
