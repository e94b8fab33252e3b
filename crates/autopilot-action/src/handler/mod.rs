//! Action handler registry and trait definitions.
//!
//! Defines the `ActionHandler` and `UndoHandler` async traits and the
//! registry that maps each action type to at most one of each.

pub mod logging;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use autopilot_core::types::{ActionType, ExecutedActionRecord, RuleAction};

use crate::error::HandlerError;

pub use logging::LoggingHandler;

/// Performs the side effect for one action type.
///
/// Implementations should be idempotent or safe to retry and enforce their
/// own timeouts, reporting them as errors.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        action: &RuleAction,
        candidate_id: &str,
        related_entity_id: Option<&str>,
    ) -> Result<(), HandlerError>;

    /// Human-readable description of what `execute` would do.
    fn describe(&self, action: &RuleAction) -> String {
        action.action_type().label().to_string()
    }
}

/// Performs the compensating action for an executed record.
#[async_trait]
pub trait UndoHandler: Send + Sync {
    async fn undo(&self, record: &ExecutedActionRecord) -> Result<(), HandlerError>;
}

/// Registry of action and undo handlers keyed by action type.
///
/// Lookups clone the handler `Arc` out of the lock, so no lock is held while
/// a handler runs.
#[derive(Default)]
pub struct HandlerRegistry {
    actions: RwLock<HashMap<ActionType, Arc<dyn ActionHandler>>>,
    undos: RwLock<HashMap<ActionType, Arc<dyn UndoHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the action handler for `action_type`, replacing any existing one.
    pub fn register_action_handler(&self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        let previous = self
            .actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action_type, handler);
        if previous.is_some() {
            warn!(%action_type, "Replaced existing action handler");
        } else {
            info!(%action_type, "Registered action handler");
        }
    }

    /// Register the undo handler for `action_type`, replacing any existing one.
    pub fn register_undo_handler(&self, action_type: ActionType, handler: Arc<dyn UndoHandler>) {
        let previous = self
            .undos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action_type, handler);
        if previous.is_some() {
            warn!(%action_type, "Replaced existing undo handler");
        } else {
            info!(%action_type, "Registered undo handler");
        }
    }

    pub fn action_handler(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action_type)
            .cloned()
    }

    pub fn undo_handler(&self, action_type: ActionType) -> Option<Arc<dyn UndoHandler>> {
        self.undos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action_type)
            .cloned()
    }

    /// Action types with a registered action handler.
    pub fn registered_types(&self) -> Vec<ActionType> {
        let actions = self.actions.read().unwrap_or_else(PoisonError::into_inner);
        ActionType::ALL
            .into_iter()
            .filter(|t| actions.contains_key(t))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("action_types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rejecting(&'static str);

    #[async_trait]
    impl ActionHandler for Rejecting {
        async fn execute(
            &self,
            _action: &RuleAction,
            _candidate_id: &str,
            _related_entity_id: Option<&str>,
        ) -> Result<(), HandlerError> {
            Err(HandlerError::Failed(self.0.to_string()))
        }
    }

    fn tag() -> RuleAction {
        RuleAction::Tag {
            tag: "x".to_string(),
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::new();
        assert!(registry.action_handler(ActionType::Tag).is_none());
        assert!(registry.undo_handler(ActionType::Tag).is_none());
        assert!(registry.registered_types().is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_handler() {
        let registry = HandlerRegistry::new();
        registry.register_action_handler(ActionType::Tag, Arc::new(Rejecting("first")));
        registry.register_action_handler(ActionType::Tag, Arc::new(Rejecting("second")));

        let handler = registry.action_handler(ActionType::Tag).unwrap();
        let err = handler.execute(&tag(), "c1", None).await.unwrap_err();
        assert_eq!(err.to_string(), "second");
        assert_eq!(registry.registered_types(), vec![ActionType::Tag]);
    }

    #[test]
    fn test_action_and_undo_handlers_are_independent() {
        let registry = HandlerRegistry::new();
        registry.register_undo_handler(ActionType::Invite, Arc::new(LoggingHandler));
        assert!(registry.undo_handler(ActionType::Invite).is_some());
        assert!(registry.action_handler(ActionType::Invite).is_none());
    }

    #[test]
    fn test_default_describe_uses_label() {
        assert_eq!(Rejecting("x").describe(&tag()), "Tag candidate");
    }
}
