//! Order materialization: turning one due subscription into one persisted
//! delivery order, inside the caller's transaction.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Row, Sqlite, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::db::DueSubscription;
use crate::model::{OrderStatus, PaymentStatus, SubscriptionStatus};

/// Creates exactly one order for a (subscription, delivery date) pair.
///
/// The production implementation writes through SQL; tests inject failing
/// or blocking implementations to exercise the runner's isolation and
/// re-entrancy behavior.
#[async_trait]
pub trait OrderMaterializer: Send + Sync {
    /// Insert the order and its line-item snapshots. The caller owns the
    /// transaction: on error it is dropped without commit, so no partial
    /// order is ever observable.
    async fn materialize(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        subscription: &DueSubscription,
        delivery_date: NaiveDate,
    ) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlOrderMaterializer;

#[async_trait]
impl OrderMaterializer for SqlOrderMaterializer {
    async fn materialize(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        subscription: &DueSubscription,
        delivery_date: NaiveDate,
    ) -> Result<i64> {
        if subscription.status != SubscriptionStatus::Active {
            bail!(
                "subscription {} is not active ({})",
                subscription.id,
                subscription.status.as_str()
            );
        }
        if subscription.items.is_empty() {
            bail!("subscription {} has no line items", subscription.id);
        }

        let total_amount: f64 = subscription
            .items
            .iter()
            .map(|item| item.quantity as f64 * item.unit_price)
            .sum();
        let order_number = order_number(subscription.id);

        let order_id: i64 = sqlx::query(
            "INSERT INTO subscription_orders (order_number, subscription_id, customer_id, \
             distributor_id, status, payment_status, delivery_date, delivery_time, \
             delivery_address, total_amount, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&order_number)
        .bind(subscription.id)
        .bind(subscription.customer_id)
        .bind(subscription.distributor_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .bind(delivery_date)
        .bind(subscription.delivery_time.as_str())
        .bind(subscription.delivery_address.as_deref())
        .bind(total_amount)
        .bind(subscription.special_instructions.as_deref())
        .fetch_one(&mut **tx)
        .await?
        .get("id");

        for item in &subscription.items {
            sqlx::query(
                "INSERT INTO subscription_order_items (order_id, product_id, product_name, \
                 quantity, unit_price, unit, line_total) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(&item.unit)
            .bind(item.quantity as f64 * item.unit_price)
            .execute(&mut **tx)
            .await?;
        }

        info!(
            order_number = %order_number,
            subscription_id = subscription.id,
            %delivery_date,
            total_amount,
            "created subscription order"
        );
        Ok(order_id)
    }
}

/// Collision-free order number: epoch millis plus the subscription id plus
/// a random suffix. Never derived from a racy row count.
fn order_number(subscription_id: i64) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("SUB-{millis}-{subscription_id}-{}", &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_do_not_collide() {
        let a = order_number(7);
        let b = order_number(7);
        assert!(a.starts_with("SUB-"));
        assert_ne!(a, b);
    }
}
