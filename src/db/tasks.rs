//! Task store operations.
//!
//! All coordination is expressed as conditional updates against the
//! current state (optimistic concurrency). A lost race returns `false`
//! or an empty batch, never an error: the caller decides whether to
//! retry. The conditional `WHERE state = ...` guard inside a
//! transaction is what guarantees at-most-one claimant per task even
//! under concurrent coordinator instances.

use super::{Database, now_ms};
use crate::types::{Task, TaskState};
use anyhow::Result;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let command: String = row.get("command")?;
    let state_str: String = row.get("state")?;
    let scheduled_at: i64 = row.get("scheduled_at")?;
    let picked_at: Option<i64> = row.get("picked_at")?;
    let started_at: Option<i64> = row.get("started_at")?;
    let completed_at: Option<i64> = row.get("completed_at")?;
    let failed_at: Option<i64> = row.get("failed_at")?;
    let lease_owner: Option<String> = row.get("lease_owner")?;
    let lease_expires_at: Option<i64> = row.get("lease_expires_at")?;
    let miss_count: i32 = row.get("miss_count")?;
    let created_at: i64 = row.get("created_at")?;
    let updated_at: i64 = row.get("updated_at")?;

    let state = TaskState::parse(&state_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown task state '{}'", state_str).into(),
        )
    })?;

    Ok(Task {
        id,
        command,
        state,
        scheduled_at,
        picked_at,
        started_at,
        completed_at,
        failed_at,
        lease_owner,
        lease_expires_at,
        miss_count,
        created_at,
        updated_at,
    })
}

/// Internal helper to get a task using an existing connection.
fn get_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    let result = stmt.query_row(params![task_id], parse_task_row);

    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Database {
    /// Create a new task in `Scheduled` state.
    pub fn insert_task(&self, command: &str, scheduled_at: i64) -> Result<Task> {
        let task_id = Uuid::now_v7().to_string();
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, command, state, scheduled_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    &task_id,
                    command,
                    TaskState::Scheduled.as_str(),
                    scheduled_at,
                    now,
                    now,
                ],
            )?;

            Ok(Task {
                id: task_id,
                command: command.to_string(),
                state: TaskState::Scheduled,
                scheduled_at,
                picked_at: None,
                started_at: None,
                completed_at: None,
                failed_at: None,
                lease_owner: None,
                lease_expires_at: None,
                miss_count: 0,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Atomically claim up to `limit` due, unleased tasks for `owner`.
    ///
    /// Each claimed task moves `Scheduled -> Picked` with `picked_at`,
    /// `lease_owner` and `lease_expires_at` stamped in the same update.
    /// The per-row `WHERE state = 'scheduled'` re-check inside the
    /// transaction makes the claim race-safe: a task another coordinator
    /// got first simply drops out of the batch.
    pub fn claim_due(
        &self,
        now: i64,
        limit: i64,
        owner: &str,
        lease_ttl_ms: i64,
    ) -> Result<Vec<Task>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let due_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM tasks
                     WHERE state = 'scheduled' AND scheduled_at <= ?1
                     ORDER BY scheduled_at
                     LIMIT ?2",
                )?;
                stmt.query_map(params![now, limit], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?
            };

            let mut claimed = Vec::new();
            for id in due_ids {
                let updated = tx.execute(
                    "UPDATE tasks SET
                        state = 'picked', picked_at = ?1,
                        lease_owner = ?2, lease_expires_at = ?3, updated_at = ?1
                     WHERE id = ?4 AND state = 'scheduled'",
                    params![now, owner, now + lease_ttl_ms, &id],
                )?;

                if updated == 1
                    && let Some(task) = get_task_internal(&tx, &id)?
                {
                    claimed.push(task);
                }
            }

            tx.commit()?;
            Ok(claimed)
        })
    }

    /// Conditional state transition.
    ///
    /// Succeeds only if the task is currently in `from`. Returns `false`
    /// (not an error) on mismatch, signaling a lost race. The lifecycle
    /// timestamp for `to` is stamped in the same update; terminal and
    /// reclaim transitions clear the lease fields atomically with it.
    pub fn transition(&self, task_id: &str, from: TaskState, to: TaskState, now: i64) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }

        let clears_lease = to.is_terminal() || to == TaskState::Scheduled;

        self.with_conn(|conn| {
            let sql = match (to.timestamp_column(), clears_lease) {
                (Some(col), true) => format!(
                    "UPDATE tasks SET state = ?1, {col} = ?2,
                        lease_owner = NULL, lease_expires_at = NULL, updated_at = ?2
                     WHERE id = ?3 AND state = ?4"
                ),
                (Some(col), false) => format!(
                    "UPDATE tasks SET state = ?1, {col} = ?2, updated_at = ?2
                     WHERE id = ?3 AND state = ?4"
                ),
                (None, _) => String::from(
                    "UPDATE tasks SET state = ?1,
                        lease_owner = NULL, lease_expires_at = NULL, updated_at = ?2
                     WHERE id = ?3 AND state = ?4",
                ),
            };

            let updated = conn.execute(
                &sql,
                params![to.as_str(), now, task_id, from.as_str()],
            )?;

            Ok(updated == 1)
        })
    }

    /// Renew a lease. Succeeds only while `owner` still holds it.
    ///
    /// A `false` return is a hard cancellation signal: another actor
    /// reclaimed the task, and the caller must abort its execution.
    pub fn renew_lease(&self, task_id: &str, owner: &str, new_expiry: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET lease_expires_at = ?1, updated_at = ?2
                 WHERE id = ?3 AND lease_owner = ?4 AND state IN ('picked', 'running')",
                params![new_expiry, now_ms(), task_id, owner],
            )?;

            Ok(updated == 1)
        })
    }

    /// Reclaim or permanently fail every task whose lease has expired.
    ///
    /// Each expired lease counts as one miss. Below `max_misses` the
    /// task returns to `Scheduled` for re-pickup; at `max_misses` it
    /// moves to `Failed` with `failed_at` set. Lease fields are cleared
    /// either way. Returns the affected rows.
    pub fn expire_stale_leases(&self, now: i64, max_misses: i32) -> Result<Vec<Task>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let stale_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM tasks
                     WHERE lease_expires_at IS NOT NULL AND lease_expires_at < ?1
                       AND state IN ('picked', 'running')",
                )?;
                stmt.query_map(params![now], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?
            };

            let mut expired = Vec::new();
            for id in stale_ids {
                // Re-check expiry inside the update: a renewal racing this
                // sweep keeps its lease.
                let reclaimed = tx.execute(
                    "UPDATE tasks SET
                        state = 'scheduled', miss_count = miss_count + 1,
                        lease_owner = NULL, lease_expires_at = NULL, updated_at = ?1
                     WHERE id = ?2 AND lease_expires_at < ?1
                       AND state IN ('picked', 'running')
                       AND miss_count + 1 < ?3",
                    params![now, &id, max_misses],
                )?;

                if reclaimed == 0 {
                    tx.execute(
                        "UPDATE tasks SET
                            state = 'failed', failed_at = ?1, miss_count = miss_count + 1,
                            lease_owner = NULL, lease_expires_at = NULL, updated_at = ?1
                         WHERE id = ?2 AND lease_expires_at < ?1
                           AND state IN ('picked', 'running')",
                        params![now, &id],
                    )?;
                }

                if let Some(task) = get_task_internal(&tx, &id)? {
                    expired.push(task);
                }
            }

            tx.commit()?;
            Ok(expired)
        })
    }

    /// Count tasks currently in the given state.
    pub fn count_in_state(&self, state: TaskState) -> Result<i64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE state = ?1",
                params![state.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
