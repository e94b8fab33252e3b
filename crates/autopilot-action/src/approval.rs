//! Queue of actions waiting for human sign-off.

use std::sync::Arc;

use uuid::Uuid;

use autopilot_core::types::{ExecutedActionRecord, PendingApproval};
use autopilot_storage::{ActionStore, StorageError};

/// Pending approvals backed by the action store.
///
/// Resolution goes through [`take`](ApprovalQueue::take), which removes the
/// approval in the same step that returns it, so each approval resolves once.
pub struct ApprovalQueue {
    store: Arc<dyn ActionStore>,
}

impl ApprovalQueue {
    pub fn new(store: Arc<dyn ActionStore>) -> Self {
        Self { store }
    }

    /// Persist an approval with its `pending_approval` record.
    pub fn enqueue(
        &self,
        record: &ExecutedActionRecord,
        approval: &PendingApproval,
    ) -> Result<(), StorageError> {
        self.store.queue_approval(record, approval)
    }

    /// Consume an approval. `None` if it is unknown, already resolved, or
    /// owned by another tenant (in which case it stays queued).
    pub fn take(&self, id: Uuid, tenant_id: &str) -> Result<Option<PendingApproval>, StorageError> {
        self.store.take_approval(id, tenant_id)
    }

    /// Live approvals, oldest first.
    pub fn list(&self, tenant_id: Option<&str>) -> Result<Vec<PendingApproval>, StorageError> {
        self.store.list_approvals(tenant_id)
    }
}
