//! Per-record exclusivity for undo and retry.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

/// Set of record ids with an operation in flight.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    ids: Mutex<HashSet<Uuid>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, or `None` if another caller holds it.
    pub(crate) fn try_claim(&self, id: Uuid) -> Option<InFlightGuard<'_>> {
        let inserted = self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then_some(InFlightGuard { set: self, id })
    }
}

/// Releases the claim on drop.
pub(crate) struct InFlightGuard<'a> {
    set: &'a InFlight,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
