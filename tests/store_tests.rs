//! Integration tests for the task store: claiming, transitions,
//! lease renewal and stale-lease reclamation.

use taskqd::db::{Database, now_ms};
use taskqd::types::TaskState;

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create test database")
}

#[test]
fn insert_then_get_roundtrip() {
    let db = setup_db();

    let task = db.insert_task("echo hello", 12_345).unwrap();
    let fetched = db.get_task(&task.id).unwrap().unwrap();

    assert_eq!(fetched.id, task.id);
    assert_eq!(fetched.command, "echo hello");
    assert_eq!(fetched.state, TaskState::Scheduled);
    assert_eq!(fetched.scheduled_at, 12_345);
    assert!(fetched.picked_at.is_none());
    assert!(fetched.lease_owner.is_none());
    assert_eq!(fetched.miss_count, 0);
}

#[test]
fn get_unknown_task_is_none() {
    let db = setup_db();
    assert!(db.get_task("no-such-id").unwrap().is_none());
}

#[test]
fn claim_due_respects_time_and_limit() {
    let db = setup_db();

    db.insert_task("a", 100).unwrap();
    db.insert_task("b", 200).unwrap();
    db.insert_task("c", 300).unwrap();
    db.insert_task("future", 99_999).unwrap();

    let claimed = db.claim_due(500, 2, "w1", 30_000).unwrap();
    assert_eq!(claimed.len(), 2);
    // Oldest due tasks first.
    assert_eq!(claimed[0].command, "a");
    assert_eq!(claimed[1].command, "b");

    for task in &claimed {
        assert_eq!(task.state, TaskState::Picked);
        assert_eq!(task.lease_owner.as_deref(), Some("w1"));
        assert_eq!(task.lease_expires_at, Some(500 + 30_000));
        assert_eq!(task.picked_at, Some(500));
    }

    // Remaining due task goes to the next claimant; the future one stays.
    let claimed = db.claim_due(500, 10, "w2", 30_000).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].command, "c");
}

#[test]
fn concurrent_claimants_never_share_a_task() {
    let db = setup_db();

    let mut ids = std::collections::HashSet::new();
    for i in 0..20 {
        ids.insert(db.insert_task(&format!("task {i}"), 0).unwrap().id);
    }

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let db = db.clone();
            std::thread::spawn(move || {
                let mut mine = Vec::new();
                loop {
                    let batch = db.claim_due(100, 3, &format!("w{w}"), 30_000).unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|t| t.id));
                }
                mine
            })
        })
        .collect();

    let mut seen = std::collections::HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "task claimed by more than one worker");
        }
    }
    assert_eq!(seen, ids);
}

#[test]
fn transition_requires_current_state() {
    let db = setup_db();
    let task = db.insert_task("x", 0).unwrap();

    // Task is Scheduled; a Running -> Completed transition must not apply.
    assert!(
        !db.transition(&task.id, TaskState::Running, TaskState::Completed, 100)
            .unwrap()
    );

    db.claim_due(50, 1, "w1", 30_000).unwrap();
    assert!(
        db.transition(&task.id, TaskState::Picked, TaskState::Running, 100)
            .unwrap()
    );

    // Replaying the same transition is a no-op, not an error.
    assert!(
        !db.transition(&task.id, TaskState::Picked, TaskState::Running, 100)
            .unwrap()
    );
}

#[test]
fn illegal_transitions_are_rejected() {
    let db = setup_db();
    let task = db.insert_task("x", 0).unwrap();

    // Scheduled cannot jump straight to Running or Completed.
    assert!(
        !db.transition(&task.id, TaskState::Scheduled, TaskState::Running, 100)
            .unwrap()
    );
    assert!(
        !db.transition(&task.id, TaskState::Scheduled, TaskState::Completed, 100)
            .unwrap()
    );
    assert_eq!(
        db.get_task(&task.id).unwrap().unwrap().state,
        TaskState::Scheduled
    );
}

#[test]
fn terminal_transition_stamps_time_and_clears_lease() {
    let db = setup_db();
    let task = db.insert_task("x", 0).unwrap();

    db.claim_due(100, 1, "w1", 30_000).unwrap();
    db.transition(&task.id, TaskState::Picked, TaskState::Running, 200)
        .unwrap();
    db.transition(&task.id, TaskState::Running, TaskState::Completed, 300)
        .unwrap();

    let task = db.get_task(&task.id).unwrap().unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.picked_at, Some(100));
    assert_eq!(task.started_at, Some(200));
    assert_eq!(task.completed_at, Some(300));
    assert!(task.failed_at.is_none());
    assert!(task.lease_owner.is_none());
    assert!(task.lease_expires_at.is_none());

    // Terminal states are final.
    assert!(
        !db.transition(&task.id, TaskState::Completed, TaskState::Scheduled, 400)
            .unwrap()
    );
}

#[test]
fn renew_lease_requires_ownership() {
    let db = setup_db();
    let task = db.insert_task("x", 0).unwrap();
    db.claim_due(100, 1, "w1", 1_000).unwrap();

    assert!(db.renew_lease(&task.id, "w1", 5_000).unwrap());
    assert_eq!(
        db.get_task(&task.id).unwrap().unwrap().lease_expires_at,
        Some(5_000)
    );

    // A different worker cannot renew someone else's lease.
    assert!(!db.renew_lease(&task.id, "w2", 9_000).unwrap());
}

#[test]
fn expired_lease_is_reclaimed_with_miss_counted() {
    let db = setup_db();
    let task = db.insert_task("x", 0).unwrap();

    db.claim_due(100, 1, "w1", 1_000).unwrap();

    let expired = db.expire_stale_leases(2_000, 3).unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].state, TaskState::Scheduled);
    assert_eq!(expired[0].miss_count, 1);
    assert!(expired[0].lease_owner.is_none());
    assert!(expired[0].lease_expires_at.is_none());

    // Renewal by the old holder now fails: the lease is gone for good.
    assert!(!db.renew_lease(&task.id, "w1", 9_000).unwrap());

    // The task is claimable again.
    let reclaimed = db.claim_due(3_000, 1, "w2", 1_000).unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, task.id);
    assert_eq!(reclaimed[0].lease_owner.as_deref(), Some("w2"));
}

#[test]
fn miss_budget_exhaustion_fails_permanently() {
    let db = setup_db();
    let task = db.insert_task("x", 0).unwrap();
    let max_misses = 3;

    let mut now = 100;
    for expected_misses in 1..=max_misses {
        let claimed = db.claim_due(now, 1, "w1", 1_000).unwrap();
        assert_eq!(claimed.len(), 1, "miss {expected_misses}: claim failed");

        now += 2_000;
        let expired = db.expire_stale_leases(now, max_misses).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].miss_count, expected_misses);

        if expected_misses < max_misses {
            assert_eq!(expired[0].state, TaskState::Scheduled);
        } else {
            assert_eq!(expired[0].state, TaskState::Failed);
            assert_eq!(expired[0].failed_at, Some(now));
        }
    }

    // Permanently failed: never claimable again.
    let task = db.get_task(&task.id).unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert!(db.claim_due(now + 1_000, 10, "w2", 1_000).unwrap().is_empty());
}

#[test]
fn sweep_leaves_live_leases_alone() {
    let db = setup_db();
    db.insert_task("x", 0).unwrap();
    db.claim_due(100, 1, "w1", 10_000).unwrap();

    assert!(db.expire_stale_leases(5_000, 3).unwrap().is_empty());
}

#[test]
fn count_in_state_tracks_lifecycle() {
    let db = setup_db();
    db.insert_task("a", 0).unwrap();
    db.insert_task("b", 0).unwrap();

    assert_eq!(db.count_in_state(TaskState::Scheduled).unwrap(), 2);

    db.claim_due(now_ms(), 1, "w1", 30_000).unwrap();
    assert_eq!(db.count_in_state(TaskState::Scheduled).unwrap(), 1);
    assert_eq!(db.count_in_state(TaskState::Picked).unwrap(), 1);
}
