//! Core types for the task queue.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// Transitions are one-directional:
/// `Scheduled -> Picked -> Running -> {Completed | Failed}`.
/// `Failed` is additionally reachable from any non-terminal state via
/// lease-miss exhaustion. There is no transition out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduled,
    Picked,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    /// The string stored in the `state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Scheduled => "scheduled",
            TaskState::Picked => "picked",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// Parse a state string from the database.
    pub fn parse(s: &str) -> Option<TaskState> {
        match s {
            "scheduled" => Some(TaskState::Scheduled),
            "picked" => Some(TaskState::Picked),
            "running" => Some(TaskState::Running),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// The state machine rejects illegal transitions; it never retries.
    /// Callers decide what to do with a rejection.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        match (self, to) {
            (TaskState::Scheduled, TaskState::Picked) => true,
            (TaskState::Picked, TaskState::Running) => true,
            (TaskState::Running, TaskState::Completed) => true,
            (TaskState::Running, TaskState::Failed) => true,
            // Lease-miss exhaustion can fail a task before it ever runs.
            (TaskState::Scheduled, TaskState::Failed) => true,
            (TaskState::Picked, TaskState::Failed) => true,
            // Lease expiry returns a leased task to the pool.
            (TaskState::Picked, TaskState::Scheduled) => true,
            (TaskState::Running, TaskState::Scheduled) => true,
            _ => false,
        }
    }

    /// The lifecycle timestamp column stamped when entering this state,
    /// if any. Entering `Scheduled` (initial or via lease reclaim) stamps
    /// nothing: `scheduled_at` is set once at creation.
    pub fn timestamp_column(&self) -> Option<&'static str> {
        match self {
            TaskState::Scheduled => None,
            TaskState::Picked => Some("picked_at"),
            TaskState::Running => Some("started_at"),
            TaskState::Completed => Some("completed_at"),
            TaskState::Failed => Some("failed_at"),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row. The unit of work.
///
/// All timestamps are epoch milliseconds. Lifecycle timestamps are
/// `Option` and set exactly once, never reversed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Opaque command payload; immutable after creation.
    pub command: String,
    pub state: TaskState,
    /// The task must not be leased before this time.
    pub scheduled_at: i64,
    pub picked_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    /// Worker identity holding the current lease.
    /// Present iff state is Picked or Running.
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<i64>,
    /// How many leases on this task expired without completion.
    pub miss_count: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Whether the task currently holds a live lease.
    pub fn has_live_lease(&self, now: i64) -> bool {
        self.lease_owner.is_some() && self.lease_expires_at.is_some_and(|exp| exp > now)
    }
}
