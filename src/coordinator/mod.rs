//! The coordinator: a single scan loop that sweeps expired leases,
//! claims due work, and hands each claimed task to a dispatcher.

pub mod dispatch;
pub mod lease;

use crate::config::CoordinatorConfig;
use crate::db::{Database, now_ms};
use anyhow::Result;
use dispatch::{Dispatcher, Executor};
use lease::LeaseManager;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

pub struct Coordinator {
    config: CoordinatorConfig,
    lease: LeaseManager,
    dispatcher: Dispatcher,
    // Bounds concurrent dispatches; also used to drain at shutdown.
    permits: Arc<Semaphore>,
}

impl Coordinator {
    pub fn new(db: Database, config: CoordinatorConfig, executor: Arc<dyn Executor>) -> Self {
        let lease = LeaseManager::new(db.clone(), &config);
        let dispatcher = Dispatcher::new(
            db,
            lease.clone(),
            executor,
            config.renew_interval(),
        );
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatches));

        Self {
            config,
            lease,
            dispatcher,
            permits,
        }
    }

    /// Run the scan loop until `shutdown` flips to true, then drain
    /// in-flight dispatches for up to the configured grace period.
    ///
    /// A failed tick is logged and retried on the next interval; the
    /// loop itself never dies.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker = %self.lease.worker_id(),
            scan_interval_ms = self.config.scan_interval_ms,
            "Coordinator started"
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Scan tick failed, will retry next interval");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!("Coordinator stopped");
    }

    /// One scan pass: sweep expired leases, then claim and dispatch as
    /// much due work as free dispatch slots allow.
    pub async fn tick(&self) -> Result<()> {
        let now = now_ms();

        self.lease.sweep_expired(now)?;

        let free_slots = self.permits.available_permits() as i64;
        if free_slots == 0 {
            debug!("All dispatch slots busy, skipping claim");
            return Ok(());
        }

        let claimed = self.lease.acquire_due(now, free_slots)?;

        for task in claimed {
            // Cannot fail: we only claim as many tasks as free slots,
            // and permits are only returned, never taken elsewhere.
            let permit = self.permits.clone().acquire_owned().await?;
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.run(task).await;
                drop(permit);
            });
        }

        Ok(())
    }

    /// Wait for in-flight dispatches, up to the shutdown grace period.
    /// Abandoned tasks keep their lease and are reclaimed by whichever
    /// coordinator sweeps after it expires.
    async fn drain(&self) {
        let all = self.config.max_concurrent_dispatches as u32;
        let drained = tokio::time::timeout(
            self.config.shutdown_grace(),
            self.permits.acquire_many(all),
        )
        .await;

        match drained {
            Ok(_) => info!("All in-flight tasks finished"),
            Err(_) => warn!(
                grace_ms = self.config.shutdown_grace_ms,
                "Shutdown grace expired with tasks still in flight"
            ),
        }
    }
}
