//! Batch processing of due subscriptions: one order per due subscription,
//! schedule advanced in the same transaction, failures isolated per
//! subscription.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::db::{self, DueSubscription};
use crate::materializer::OrderMaterializer;
use crate::model::{RunReport, RunStatus};
use crate::recurrence;

/// Process every subscription due as of `now` and return the run report.
///
/// Per-subscription errors are captured into the report and never escape;
/// only a failure of the due-subscription query itself aborts the run, and
/// even that is reported rather than propagated. The re-entrancy guard
/// lives in the scheduler, which wraps this function.
#[instrument(skip_all)]
pub async fn run_once(
    pool: &SqlitePool,
    materializer: &dyn OrderMaterializer,
    now: DateTime<Utc>,
) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport::new(now);
    let today = now.date_naive();
    info!(%today, "starting subscription order processing");

    let due = match db::find_due_subscriptions(pool, today).await {
        Ok(due) => due,
        Err(err) => {
            error!(?err, "failed to query due subscriptions");
            report.status = RunStatus::Failed;
            report.record_error(None, format!("due query failed: {err:#}"));
            report.duration_secs = started.elapsed().as_secs_f64();
            return report;
        }
    };

    report.total_examined = due.len() as u64;
    info!(count = due.len(), "found subscriptions due for delivery");

    for subscription in &due {
        match process_subscription(pool, materializer, subscription, today).await {
            Ok(next) => {
                report.orders_created += 1;
                match next {
                    Some(next) => info!(
                        subscription_id = subscription.id,
                        next_delivery = %next,
                        "subscription processed"
                    ),
                    None => info!(subscription_id = subscription.id, "subscription completed"),
                }
            }
            Err(err) => {
                // One subscription's failure never blocks the rest; progress
                // stays untouched so the next run retries this due date.
                error!(?err, subscription_id = subscription.id, "failed to process subscription");
                report.record_error(Some(subscription.id), format!("{err:#}"));
            }
        }
    }

    report.duration_secs = started.elapsed().as_secs_f64();
    info!(
        examined = report.total_examined,
        orders_created = report.orders_created,
        errors = report.errors,
        duration_secs = report.duration_secs,
        "completed subscription order processing"
    );
    report
}

/// Materialize the due order and advance (or complete) the schedule within
/// a single transaction scoped to this subscription, so a crash can neither
/// advance the schedule without a durable order nor leave an order that
/// will be generated again.
async fn process_subscription(
    pool: &SqlitePool,
    materializer: &dyn OrderMaterializer,
    subscription: &DueSubscription,
    today: NaiveDate,
) -> Result<Option<NaiveDate>> {
    let due_date = subscription.next_delivery_date.unwrap_or(today);
    let next = recurrence::next_delivery_date(&subscription.recurrence_rule(), due_date, today);

    let mut tx = pool.begin().await?;
    materializer.materialize(&mut tx, subscription, due_date).await?;

    let completed = matches!(subscription.end_date, Some(end) if next > end);
    if completed {
        db::complete_subscription_tx(&mut tx, subscription.id, due_date).await?;
    } else {
        db::advance_subscription_tx(&mut tx, subscription.id, due_date, next).await?;
    }
    tx.commit().await?;

    Ok(if completed { None } else { Some(next) })
}
