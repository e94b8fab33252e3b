//! Dry-run handler.
//!
//! Logs the side effect it would perform and reports success. Used by the
//! operator CLI, which has no real integrations to call.

use async_trait::async_trait;
use tracing::info;

use autopilot_core::types::{ExecutedActionRecord, RuleAction};

use crate::error::HandlerError;
use crate::handler::{ActionHandler, UndoHandler};

/// Handler that only logs (both directions).
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl ActionHandler for LoggingHandler {
    async fn execute(
        &self,
        action: &RuleAction,
        candidate_id: &str,
        related_entity_id: Option<&str>,
    ) -> Result<(), HandlerError> {
        info!(
            action_type = %action.action_type(),
            candidate = %candidate_id,
            related = related_entity_id.unwrap_or("-"),
            "Dry run: {}",
            self.describe(action)
        );
        Ok(())
    }

    fn describe(&self, action: &RuleAction) -> String {
        match action {
            RuleAction::Invite { slot_ids, .. } if slot_ids.is_empty() => {
                "Invite candidate".to_string()
            }
            RuleAction::Invite { slot_ids, .. } => {
                format!("Invite candidate ({} slots offered)", slot_ids.len())
            }
            RuleAction::Clarify { question } => format!("Ask candidate: {}", question),
            RuleAction::Reject {
                notify_candidate, ..
            } => {
                if *notify_candidate {
                    "Reject candidate and notify them".to_string()
                } else {
                    "Reject candidate silently".to_string()
                }
            }
            RuleAction::Notify { recipients, .. } => {
                format!("Notify team ({} recipients)", recipients.len())
            }
            RuleAction::PauseListing { listing_id, .. } => format!(
                "Pause listing {}",
                listing_id.as_deref().unwrap_or("<related entity>")
            ),
            RuleAction::Tag { tag } => format!("Tag candidate '{}'", tag),
        }
    }
}

#[async_trait]
impl UndoHandler for LoggingHandler {
    async fn undo(&self, record: &ExecutedActionRecord) -> Result<(), HandlerError> {
        info!(
            record_id = %record.id,
            action_type = %record.action_type(),
            candidate = %record.candidate_id,
            "Dry run: reverse {}",
            self.describe(&record.action)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_handler_succeeds() {
        let action = RuleAction::Clarify {
            question: "Are you open to relocation?".to_string(),
        };
        assert!(LoggingHandler.execute(&action, "c1", None).await.is_ok());
    }

    #[test]
    fn test_describe_per_action() {
        let handler = LoggingHandler;
        assert_eq!(
            handler.describe(&RuleAction::Tag {
                tag: "strong-fit".to_string()
            }),
            "Tag candidate 'strong-fit'"
        );
        assert_eq!(
            handler.describe(&RuleAction::Invite {
                message: None,
                slot_ids: vec!["s1".to_string(), "s2".to_string()],
            }),
            "Invite candidate (2 slots offered)"
        );
        assert_eq!(
            handler.describe(&RuleAction::PauseListing {
                listing_id: None,
                reason: None,
            }),
            "Pause listing <related entity>"
        );
        assert_eq!(
            handler.describe(&RuleAction::Reject {
                reason: None,
                notify_candidate: true,
            }),
            "Reject candidate and notify them"
        );
    }
}
