//! Undo registry: which executed actions are still reversible, and reversal.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use autopilot_core::clock::Clock;
use autopilot_core::types::{ActionStatus, ExecutedActionRecord};
use autopilot_storage::{ActionStore, StorageError};

use crate::error::UndoRefusal;
use crate::guard::InFlight;
use crate::handler::HandlerRegistry;
use crate::record::validate_transition;
use crate::types::UndoOutcome;

/// Check whether `record` can be undone at `now`.
pub fn check_undoable(record: &ExecutedActionRecord, now: DateTime<Utc>) -> Result<(), UndoRefusal> {
    if validate_transition(record.status, ActionStatus::Undone).is_err() {
        return Err(match record.status {
            ActionStatus::Undone => UndoRefusal::AlreadyUndone,
            status => UndoRefusal::NotUndoable(status),
        });
    }
    if !record.can_undo {
        return Err(UndoRefusal::NotUndoable(record.status));
    }
    match record.undo_deadline {
        Some(deadline) if now > deadline => Err(UndoRefusal::WindowExpired(deadline)),
        _ => Ok(()),
    }
}

pub struct UndoRegistry {
    store: Arc<dyn ActionStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
}

impl UndoRegistry {
    pub fn new(store: Arc<dyn ActionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            in_flight: InFlight::new(),
        }
    }

    pub fn can_undo_action(&self, id: Uuid) -> Result<bool, StorageError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_record(id)?
            .is_some_and(|record| check_undoable(&record, now).is_ok()))
    }

    /// Time left before the deadline, floored at zero. `None` if the record
    /// is unknown or not undoable.
    pub fn get_undo_time_remaining(&self, id: Uuid) -> Result<Option<Duration>, StorageError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_record(id)?
            .and_then(|record| record.undo_time_remaining(now)))
    }

    pub fn list_undoable(&self, tenant_id: &str) -> Result<Vec<ExecutedActionRecord>, StorageError> {
        self.store.list_undoable(tenant_id, self.clock.now())
    }

    /// Reverse an executed action.
    ///
    /// Holds exclusivity on the record id for the whole call and validates
    /// only after acquiring it. The final transition is conditional in the
    /// store, so a concurrent writer elsewhere cannot undo twice either.
    pub async fn undo(
        &self,
        id: Uuid,
        acting_user: Option<&str>,
        handlers: &HandlerRegistry,
    ) -> Result<UndoOutcome, StorageError> {
        let Some(_claim) = self.in_flight.try_claim(id) else {
            return Ok(UndoOutcome::Refused(UndoRefusal::InProgress));
        };

        let Some(record) = self.store.get_record(id)? else {
            return Ok(UndoOutcome::NotFound);
        };
        if let Err(refusal) = check_undoable(&record, self.clock.now()) {
            return Ok(UndoOutcome::Refused(refusal));
        }

        let action_type = record.action_type();
        let Some(handler) = handlers.undo_handler(action_type) else {
            return Ok(UndoOutcome::Refused(UndoRefusal::NoUndoHandler(action_type)));
        };
        if let Err(e) = handler.undo(&record).await {
            return Ok(UndoOutcome::Refused(UndoRefusal::HandlerFailed(e.to_string())));
        }

        match self.store.mark_undone(id, self.clock.now(), acting_user)? {
            Some(updated) => Ok(UndoOutcome::Undone(updated)),
            None => {
                debug!(record_id = %id, "Conditional undo update matched no row");
                let status = self
                    .store
                    .get_record(id)?
                    .map_or(record.status, |current| current.status);
                Ok(UndoOutcome::Refused(match status {
                    ActionStatus::Undone => UndoRefusal::AlreadyUndone,
                    status => UndoRefusal::NotUndoable(status),
                }))
            }
        }
    }
}

impl std::fmt::Debug for UndoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoRegistry").finish()
    }
}
