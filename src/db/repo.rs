use super::model::{
    decode_delivery_days, encode_delivery_days, DueSubscription, NewSubscription, OrderSummary,
    SubscriptionItem, SubscriptionRecord,
};
use crate::model::{DeliveryTime, Frequency, OrderStatus, SubscriptionStatus};
use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Create a subscription with its line items.
///
/// Applies the weekly delivery-day defaults, validates dates and
/// quantities, and seeds `next_delivery_date` with the start date so the
/// first delivery lands on it.
#[instrument(skip_all)]
pub async fn create_subscription(pool: &Pool, new: &NewSubscription) -> Result<i64> {
    if new.items.is_empty() {
        bail!("subscription must have at least one line item");
    }
    if new.items.iter().any(|item| item.quantity < 1) {
        bail!("line item quantity must be >= 1");
    }
    if let Some(end) = new.end_date {
        if end <= new.start_date {
            bail!("end date must be after start date");
        }
    }
    if let Some(dom) = new.delivery_day_of_month {
        if !(1..=28).contains(&dom) {
            bail!("delivery day of month must be between 1 and 28");
        }
    }

    // An empty weekday set would stall a weekly schedule; default it.
    let delivery_days = if new.delivery_days.is_empty() {
        match new.frequency {
            Frequency::Weekly => vec![chrono::Weekday::Mon],
            Frequency::TwiceWeek => vec![chrono::Weekday::Mon, chrono::Weekday::Thu],
            _ => vec![],
        }
    } else {
        new.delivery_days.clone()
    };

    let address = new
        .delivery_address
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()?;

    let mut tx = pool.begin().await?;
    let subscription_id: i64 = sqlx::query(
        "INSERT INTO subscriptions (customer_id, distributor_id, frequency, delivery_days, \
         delivery_day_of_month, start_date, end_date, delivery_time, delivery_address, \
         special_instructions, status, next_delivery_date) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?) RETURNING id",
    )
    .bind(new.customer_id)
    .bind(new.distributor_id)
    .bind(new.frequency.as_str())
    .bind(encode_delivery_days(&delivery_days))
    .bind(new.delivery_day_of_month.map(i64::from))
    .bind(new.start_date)
    .bind(new.end_date)
    .bind(new.delivery_time.as_str())
    .bind(address)
    .bind(new.special_instructions.as_deref())
    .bind(new.start_date)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for item in &new.items {
        sqlx::query(
            "INSERT INTO subscription_items (subscription_id, product_id, product_name, quantity, unit_price, unit) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(subscription_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(&item.unit)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(subscription_id)
}

/// Active subscriptions whose next delivery is due as of `today` and whose
/// end date has not passed, with line items loaded.
#[instrument(skip_all)]
pub async fn find_due_subscriptions(pool: &Pool, today: NaiveDate) -> Result<Vec<DueSubscription>> {
    let rows = sqlx::query(
        "SELECT id, customer_id, distributor_id, status, frequency, delivery_days, \
         delivery_day_of_month, start_date, end_date, next_delivery_date, delivery_time, \
         delivery_address, special_instructions \
         FROM subscriptions \
         WHERE status = 'active' \
           AND next_delivery_date IS NOT NULL \
           AND next_delivery_date <= ? \
           AND (end_date IS NULL OR end_date > ?) \
         ORDER BY id ASC",
    )
    .bind(today)
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut due = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.get("id");
        let frequency_str: String = row.get("frequency");
        let frequency = Frequency::parse(&frequency_str)
            .ok_or_else(|| anyhow!("subscription {} has unknown frequency {}", id, frequency_str))?;
        let status_str: String = row.get("status");
        let status = SubscriptionStatus::parse(&status_str)
            .ok_or_else(|| anyhow!("subscription {} has unknown status {}", id, status_str))?;
        let days_str: String = row.get("delivery_days");
        let time_str: String = row.get("delivery_time");

        due.push(DueSubscription {
            id,
            customer_id: row.get("customer_id"),
            distributor_id: row.get("distributor_id"),
            status,
            frequency,
            delivery_days: decode_delivery_days(&days_str),
            delivery_day_of_month: row
                .get::<Option<i64>, _>("delivery_day_of_month")
                .map(|d| d as u32),
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
            next_delivery_date: row.get("next_delivery_date"),
            delivery_time: DeliveryTime::parse(&time_str).unwrap_or(DeliveryTime::Morning),
            delivery_address: row.get("delivery_address"),
            special_instructions: row.get("special_instructions"),
            items: load_items(pool, id).await?,
        });
    }
    Ok(due)
}

async fn load_items(pool: &Pool, subscription_id: i64) -> Result<Vec<SubscriptionItem>> {
    let rows = sqlx::query(
        "SELECT product_id, product_name, quantity, unit_price, unit \
         FROM subscription_items WHERE subscription_id = ? ORDER BY id ASC",
    )
    .bind(subscription_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SubscriptionItem {
            product_id: row.get("product_id"),
            product_name: row.get("product_name"),
            quantity: row.get("quantity"),
            unit_price: row.get("unit_price"),
            unit: row.get("unit"),
        })
        .collect())
}

/// Advance the schedule after a successful materialization. Runs inside the
/// same transaction as the order insert so the schedule can never move
/// without a durable order.
pub async fn advance_subscription_tx(
    tx: &mut Transaction<'_, Sqlite>,
    subscription_id: i64,
    delivered_on: NaiveDate,
    next_delivery: NaiveDate,
) -> Result<()> {
    sqlx::query(
        "UPDATE subscriptions SET next_delivery_date = ?, last_delivery_date = ?, \
         total_deliveries = total_deliveries + 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(next_delivery)
    .bind(delivered_on)
    .bind(subscription_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Terminal progress update: the freshly computed next date would exceed
/// the end date, so the subscription completes and stops scheduling.
pub async fn complete_subscription_tx(
    tx: &mut Transaction<'_, Sqlite>,
    subscription_id: i64,
    delivered_on: NaiveDate,
) -> Result<()> {
    sqlx::query(
        "UPDATE subscriptions SET status = 'completed', next_delivery_date = NULL, \
         last_delivery_date = ?, total_deliveries = total_deliveries + 1, \
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(delivered_on)
    .bind(subscription_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn subscription(pool: &Pool, id: i64) -> Result<SubscriptionRecord> {
    let row = sqlx::query(
        "SELECT id, customer_id, distributor_id, status, frequency, start_date, end_date, \
         next_delivery_date, last_delivery_date, total_deliveries FROM subscriptions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(anyhow!("subscription {} not found", id));
    };

    let status_str: String = row.get("status");
    let frequency_str: String = row.get("frequency");
    Ok(SubscriptionRecord {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        distributor_id: row.get("distributor_id"),
        status: SubscriptionStatus::parse(&status_str)
            .ok_or_else(|| anyhow!("subscription {} has unknown status {}", id, status_str))?,
        frequency: Frequency::parse(&frequency_str)
            .ok_or_else(|| anyhow!("subscription {} has unknown frequency {}", id, frequency_str))?,
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        next_delivery_date: row.get("next_delivery_date"),
        last_delivery_date: row.get("last_delivery_date"),
        total_deliveries: row.get("total_deliveries"),
    })
}

async fn set_subscription_status(
    pool: &Pool,
    id: i64,
    from: &[SubscriptionStatus],
    to: SubscriptionStatus,
) -> Result<()> {
    let current = subscription(pool, id).await?.status;
    if !from.contains(&current) {
        bail!(
            "cannot move subscription {} from {} to {}",
            id,
            current.as_str(),
            to.as_str()
        );
    }
    sqlx::query("UPDATE subscriptions SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(to.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn pause_subscription(pool: &Pool, id: i64) -> Result<()> {
    set_subscription_status(pool, id, &[SubscriptionStatus::Active], SubscriptionStatus::Paused)
        .await
}

#[instrument(skip_all)]
pub async fn resume_subscription(pool: &Pool, id: i64) -> Result<()> {
    set_subscription_status(pool, id, &[SubscriptionStatus::Paused], SubscriptionStatus::Active)
        .await
}

/// Cancellation is a status transition; the row is never deleted.
#[instrument(skip_all)]
pub async fn cancel_subscription(pool: &Pool, id: i64) -> Result<()> {
    set_subscription_status(
        pool,
        id,
        &[SubscriptionStatus::Active, SubscriptionStatus::Paused],
        SubscriptionStatus::Cancelled,
    )
    .await
}

/// Derived order list for a subscription, in generation order. The order's
/// `subscription_id` back-reference is the authoritative link; no forward
/// list is stored on the subscription.
#[instrument(skip_all)]
pub async fn orders_for_subscription(pool: &Pool, subscription_id: i64) -> Result<Vec<OrderSummary>> {
    let rows = sqlx::query(
        "SELECT id, order_number, delivery_date, status, total_amount \
         FROM subscription_orders WHERE subscription_id = ? ORDER BY id ASC",
    )
    .bind(subscription_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| OrderSummary {
            id: row.get("id"),
            order_number: row.get("order_number"),
            delivery_date: row.get("delivery_date"),
            status: row.get("status"),
            total_amount: row.get("total_amount"),
        })
        .collect())
}

/// Advance a generated order along its one-way state machine.
#[instrument(skip_all)]
pub async fn update_order_status(pool: &Pool, order_id: i64, to: OrderStatus) -> Result<()> {
    let current_str: Option<String> =
        sqlx::query_scalar("SELECT status FROM subscription_orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(pool)
            .await?;
    let Some(current_str) = current_str else {
        return Err(anyhow!("order {} not found", order_id));
    };
    let current = OrderStatus::parse(&current_str)
        .ok_or_else(|| anyhow!("order {} has unknown status {}", order_id, current_str))?;
    if !current.can_transition(to) {
        bail!(
            "invalid order transition {} -> {} for order {}",
            current.as_str(),
            to.as_str(),
            order_id
        );
    }
    sqlx::query("UPDATE subscription_orders SET status = ? WHERE id = ?")
        .bind(to.as_str())
        .bind(order_id)
        .execute(pool)
        .await?;
    Ok(())
}
