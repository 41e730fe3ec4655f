//! Lease acquisition, renewal and reclamation.
//!
//! Thin policy layer over the store: the store does the atomic
//! conditional updates, this module applies the coordinator's identity
//! and timing configuration and logs outcomes.

use crate::config::CoordinatorConfig;
use crate::db::{Database, now_ms};
use crate::types::{Task, TaskState};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Manages leases on behalf of one coordinator identity.
#[derive(Clone)]
pub struct LeaseManager {
    db: Database,
    worker_id: String,
    lease_ttl_ms: i64,
    max_misses: i32,
    claim_batch: i64,
}

impl LeaseManager {
    pub fn new(db: Database, config: &CoordinatorConfig) -> Self {
        Self {
            db,
            worker_id: config.worker_id.clone(),
            lease_ttl_ms: config.lease_ttl_ms as i64,
            max_misses: config.max_misses,
            claim_batch: config.claim_batch,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim up to `limit` due tasks under this coordinator's identity,
    /// capped at the configured batch size.
    pub fn acquire_due(&self, now: i64, limit: i64) -> Result<Vec<Task>> {
        let limit = limit.min(self.claim_batch);
        let claimed = self
            .db
            .claim_due(now, limit, &self.worker_id, self.lease_ttl_ms)?;

        if !claimed.is_empty() {
            info!(
                count = claimed.len(),
                worker = %self.worker_id,
                "Claimed due tasks"
            );
        }

        Ok(claimed)
    }

    /// Extend this coordinator's lease on a task.
    ///
    /// `Ok(false)` means the lease was lost; the caller must stop
    /// executing the task.
    pub fn renew(&self, task_id: &str) -> Result<bool> {
        let renewed =
            self.db
                .renew_lease(task_id, &self.worker_id, now_ms() + self.lease_ttl_ms)?;

        if renewed {
            debug!(task_id, worker = %self.worker_id, "Lease renewed");
        } else {
            warn!(task_id, worker = %self.worker_id, "Lease lost");
        }

        Ok(renewed)
    }

    /// Sweep expired leases: reclaim tasks with miss budget left,
    /// permanently fail the rest.
    pub fn sweep_expired(&self, now: i64) -> Result<Vec<Task>> {
        let expired = self.db.expire_stale_leases(now, self.max_misses)?;

        for task in &expired {
            match task.state {
                TaskState::Scheduled => info!(
                    task_id = %task.id,
                    miss_count = task.miss_count,
                    "Reclaimed task from expired lease"
                ),
                TaskState::Failed => warn!(
                    task_id = %task.id,
                    miss_count = task.miss_count,
                    "Task failed permanently: lease miss budget exhausted"
                ),
                _ => {}
            }
        }

        Ok(expired)
    }
}
