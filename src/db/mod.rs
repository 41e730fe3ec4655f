//! Database layer for the task queue.

pub mod tasks;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::BackoffPolicy;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open the database, retrying per the given backoff policy.
    ///
    /// Startup-only: once open, steady-state store failures are handled
    /// by the scan loop (log and retry next tick).
    pub async fn open_with_backoff<P: AsRef<Path>>(path: P, policy: &BackoffPolicy) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::open(path.as_ref()) {
                Ok(db) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Task store opened after retry");
                    }
                    return Ok(db);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= policy.max_attempts {
                        warn!(attempts = attempt, "Giving up opening task store");
                        return Err(e);
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to open task store, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Jittered sleep duration used by backoff policies.
pub(crate) fn jittered(base: Duration, jitter_ms: u64) -> Duration {
    use std::time::SystemTime;

    if jitter_ms == 0 {
        return base;
    }

    // System time nanoseconds give cheap jitter without a rand dependency.
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let jitter_range = (jitter_ms * 2) as i64;
    let jitter = (nanos as i64 % jitter_range) - (jitter_ms as i64);
    let delay_ms = (base.as_millis() as i64 + jitter).max(0) as u64;
    Duration::from_millis(delay_ms)
}
