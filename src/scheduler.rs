//! Periodic trigger for the batch runner.
//!
//! The scheduler is an explicitly constructed object owning its own
//! re-entrancy flag and task handle, so independent instances can run in
//! parallel under test without interfering. The flag is in-memory only:
//! the design assumes a single runner instance per deployment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::materializer::OrderMaterializer;
use crate::model::RunReport;
use crate::runner;

pub struct Scheduler {
    pool: SqlitePool,
    materializer: Arc<dyn OrderMaterializer>,
    running: Arc<AtomicBool>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, materializer: Arc<dyn OrderMaterializer>) -> Self {
        Self {
            pool,
            materializer,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            handle: None,
        }
    }

    /// Start the cadence task. Runs one batch immediately, then one per
    /// interval. Starting an already started scheduler is a warning no-op.
    pub fn start(&mut self, every: Duration) {
        if self.handle.is_some() {
            warn!("subscription scheduler is already running");
            return;
        }
        info!(interval_secs = every.as_secs(), "starting subscription scheduler");

        let (tx, mut rx) = watch::channel(false);
        let pool = self.pool.clone();
        let materializer = Arc::clone(&self.materializer);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            // First run is immediate, independent of the cadence timer.
            run_guarded(&pool, materializer.as_ref(), &running).await;

            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval's first tick completes immediately; consume it so
            // the startup run is not doubled.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_guarded(&pool, materializer.as_ref(), &running).await;
                    }
                    _ = rx.changed() => {
                        info!("subscription scheduler stopped");
                        break;
                    }
                }
            }
        });

        self.shutdown = Some(tx);
        self.handle = Some(handle);
    }

    /// Manual trigger equivalent to one periodic invocation, sharing the
    /// same re-entrancy flag. Returns the run report synchronously.
    pub async fn run_now(&self) -> RunReport {
        run_guarded(&self.pool, self.materializer.as_ref(), &self.running).await
    }

    /// Cancel the cadence timer and wait for the task to wind down. An
    /// in-flight batch is allowed to finish. Safe to call when not started.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(?err, "scheduler task ended abnormally");
            }
        }
    }
}

/// Skip the batch entirely when a previous run is still in flight; the
/// overlapping invocation reports `already_running` and creates no orders.
async fn run_guarded(
    pool: &SqlitePool,
    materializer: &dyn OrderMaterializer,
    running: &AtomicBool,
) -> RunReport {
    if running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("subscription processing is already running; skipping");
        return RunReport::already_running(Utc::now());
    }
    let report = runner::run_once(pool, materializer, Utc::now()).await;
    running.store(false, Ordering::SeqCst);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::SqlOrderMaterializer;
    use crate::model::RunStatus;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn start_twice_is_a_noop_and_stop_is_idempotent() {
        let pool = setup_pool().await;
        let mut scheduler = Scheduler::new(pool, Arc::new(SqlOrderMaterializer));

        scheduler.start(Duration::from_secs(3600));
        assert!(scheduler.handle.is_some());
        // Second start must not replace the running task.
        scheduler.start(Duration::from_secs(3600));
        assert!(scheduler.handle.is_some());

        scheduler.stop().await;
        assert!(scheduler.handle.is_none());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn run_now_reports_completed_on_empty_batch() {
        let pool = setup_pool().await;
        let scheduler = Scheduler::new(pool, Arc::new(SqlOrderMaterializer));
        let report = scheduler.run_now().await;
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.total_examined, 0);
        assert_eq!(report.orders_created, 0);
    }
}
