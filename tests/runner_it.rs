use anyhow::{bail, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use milkrun::db::{self, DueSubscription, NewSubscription, NewSubscriptionItem};
use milkrun::materializer::{OrderMaterializer, SqlOrderMaterializer};
use milkrun::model::{DeliveryTime, Frequency, RunStatus, SubscriptionStatus};
use milkrun::runner::run_once;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn at(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(6, 0, 0).unwrap())
}

fn weekly_monday_subscription(start: NaiveDate) -> NewSubscription {
    NewSubscription {
        customer_id: 1,
        distributor_id: 2,
        frequency: Frequency::Weekly,
        delivery_days: vec![chrono::Weekday::Mon],
        delivery_day_of_month: None,
        start_date: start,
        end_date: None,
        delivery_time: DeliveryTime::Morning,
        delivery_address: Some(serde_json::json!({"street": "12 Dairy Lane", "city": "Pune"})),
        special_instructions: Some("leave at the gate".into()),
        items: vec![
            NewSubscriptionItem {
                product_id: 10,
                product_name: "Whole Milk 1L".into(),
                quantity: 2,
                unit_price: 10.0,
                unit: "litre".into(),
            },
            NewSubscriptionItem {
                product_id: 11,
                product_name: "Curd 500g".into(),
                quantity: 1,
                unit_price: 20.0,
                unit: "pack".into(),
            },
        ],
    }
}

/// Fails materialization for one chosen subscription, delegating the rest.
struct FailingMaterializer {
    fail_for: i64,
    inner: SqlOrderMaterializer,
}

#[async_trait::async_trait]
impl OrderMaterializer for FailingMaterializer {
    async fn materialize(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        subscription: &DueSubscription,
        delivery_date: NaiveDate,
    ) -> Result<i64> {
        if subscription.id == self.fail_for {
            bail!("simulated persistence failure");
        }
        self.inner.materialize(tx, subscription, delivery_date).await
    }
}

async fn order_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM subscription_orders")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn end_to_end_weekly_monday_scenario() {
    let pool = setup_pool().await;
    let monday = d(2025, 1, 6);
    let id = db::create_subscription(&pool, &weekly_monday_subscription(monday))
        .await
        .unwrap();

    let report = run_once(&pool, &SqlOrderMaterializer, at(monday)).await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total_examined, 1);
    assert_eq!(report.orders_created, 1);
    assert_eq!(report.errors, 0);

    let row = sqlx::query(
        "SELECT order_number, status, payment_status, delivery_date, delivery_time, total_amount, notes \
         FROM subscription_orders WHERE subscription_id = ?",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<String, _>("status"), "PENDING");
    assert_eq!(row.get::<String, _>("payment_status"), "PENDING");
    assert_eq!(row.get::<NaiveDate, _>("delivery_date"), monday);
    assert_eq!(row.get::<String, _>("delivery_time"), "morning");
    assert_eq!(row.get::<f64, _>("total_amount"), 40.0);
    assert_eq!(row.get::<String, _>("notes"), "leave at the gate");
    assert!(row.get::<String, _>("order_number").starts_with("SUB-"));

    let items: Vec<(String, i64, f64)> = sqlx::query_as(
        "SELECT product_name, quantity, line_total FROM subscription_order_items \
         WHERE order_id = (SELECT id FROM subscription_orders WHERE subscription_id = ?) \
         ORDER BY id ASC",
    )
    .bind(id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], ("Whole Milk 1L".into(), 2, 20.0));
    assert_eq!(items[1], ("Curd 500g".into(), 1, 20.0));

    let rec = db::subscription(&pool, id).await.unwrap();
    assert_eq!(rec.next_delivery_date, Some(d(2025, 1, 13)));
    assert_eq!(rec.last_delivery_date, Some(monday));
    assert_eq!(rec.total_deliveries, 1);
    assert_eq!(rec.status, SubscriptionStatus::Active);

    // The same day is no longer due; the schedule has moved on.
    let report = run_once(&pool, &SqlOrderMaterializer, at(monday)).await;
    assert_eq!(report.total_examined, 0);
    assert_eq!(order_count(&pool).await, 1);

    let orders = db::orders_for_subscription(&pool, id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total_amount, 40.0);
}

#[tokio::test]
async fn one_failing_subscription_does_not_block_the_batch() {
    let pool = setup_pool().await;
    let monday = d(2025, 1, 6);
    let first = db::create_subscription(&pool, &weekly_monday_subscription(monday))
        .await
        .unwrap();
    let second = db::create_subscription(&pool, &weekly_monday_subscription(monday))
        .await
        .unwrap();
    let third = db::create_subscription(&pool, &weekly_monday_subscription(monday))
        .await
        .unwrap();

    let materializer = FailingMaterializer {
        fail_for: second,
        inner: SqlOrderMaterializer,
    };
    let report = run_once(&pool, &materializer, at(monday)).await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total_examined, 3);
    assert_eq!(report.orders_created, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.error_details.len(), 1);
    assert_eq!(report.error_details[0].subscription_id, Some(second));
    assert!(report.error_details[0].error.contains("simulated persistence failure"));

    for id in [first, third] {
        let rec = db::subscription(&pool, id).await.unwrap();
        assert_eq!(rec.total_deliveries, 1);
        assert_eq!(rec.next_delivery_date, Some(d(2025, 1, 13)));
    }

    // The failed subscription keeps its due date for the next run's retry.
    let rec = db::subscription(&pool, second).await.unwrap();
    assert_eq!(rec.total_deliveries, 0);
    assert_eq!(rec.next_delivery_date, Some(monday));
    assert_eq!(order_count(&pool).await, 2);

    // A later run with a healthy materializer picks it up.
    let report = run_once(&pool, &SqlOrderMaterializer, at(monday)).await;
    assert_eq!(report.orders_created, 1);
    assert_eq!(order_count(&pool).await, 3);
}

#[tokio::test]
async fn subscription_completes_when_next_date_passes_end() {
    let pool = setup_pool().await;
    let monday = d(2025, 1, 6);
    let mut new = weekly_monday_subscription(monday);
    // Next Monday (Jan 13) exceeds this end date.
    new.end_date = Some(d(2025, 1, 8));
    let id = db::create_subscription(&pool, &new).await.unwrap();

    let report = run_once(&pool, &SqlOrderMaterializer, at(monday)).await;
    assert_eq!(report.orders_created, 1);

    let rec = db::subscription(&pool, id).await.unwrap();
    assert_eq!(rec.status, SubscriptionStatus::Completed);
    assert_eq!(rec.next_delivery_date, None);
    assert_eq!(rec.total_deliveries, 1);

    // Completed subscriptions never appear in later due queries.
    let report = run_once(&pool, &SqlOrderMaterializer, at(monday)).await;
    assert_eq!(report.total_examined, 0);
    assert_eq!(order_count(&pool).await, 1);
}

#[tokio::test]
async fn duplicate_order_for_same_due_date_is_rejected() {
    let pool = setup_pool().await;
    let monday = d(2025, 1, 6);
    let id = db::create_subscription(&pool, &weekly_monday_subscription(monday))
        .await
        .unwrap();

    // A previously committed order whose progress update was lost: the
    // unique (subscription_id, delivery_date) key must reject the replay.
    sqlx::query(
        "INSERT INTO subscription_orders (order_number, subscription_id, customer_id, \
         distributor_id, delivery_date, total_amount) VALUES ('SUB-legacy-1', ?, 1, 2, ?, 40.0)",
    )
    .bind(id)
    .bind(monday)
    .execute(&pool)
    .await
    .unwrap();

    let report = run_once(&pool, &SqlOrderMaterializer, at(monday)).await;
    assert_eq!(report.errors, 1);
    assert_eq!(report.orders_created, 0);
    assert_eq!(order_count(&pool).await, 1);

    // The whole per-subscription transaction rolled back: progress intact.
    let rec = db::subscription(&pool, id).await.unwrap();
    assert_eq!(rec.next_delivery_date, Some(monday));
    assert_eq!(rec.total_deliveries, 0);
}

#[tokio::test]
async fn stale_schedule_yields_single_catch_up_order() {
    let pool = setup_pool().await;
    let mut new = weekly_monday_subscription(d(2025, 1, 6));
    new.frequency = Frequency::Daily;
    new.delivery_days = vec![];
    let id = db::create_subscription(&pool, &new).await.unwrap();

    // Two months of downtime: exactly one order, schedule resumes from now.
    let today = d(2025, 3, 5);
    let report = run_once(&pool, &SqlOrderMaterializer, at(today)).await;
    assert_eq!(report.orders_created, 1);
    assert_eq!(order_count(&pool).await, 1);

    let rec = db::subscription(&pool, id).await.unwrap();
    assert_eq!(rec.next_delivery_date, Some(d(2025, 3, 6)));
    assert_eq!(rec.total_deliveries, 1);
}

#[tokio::test]
async fn fatal_query_failure_produces_failed_report() {
    let pool = setup_pool().await;
    sqlx::query("DROP TABLE subscriptions")
        .execute(&pool)
        .await
        .unwrap();

    let report = run_once(&pool, &SqlOrderMaterializer, Utc::now()).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.errors, 1);
    assert_eq!(report.total_examined, 0);
    assert_eq!(report.error_details[0].subscription_id, None);

    // The report stays serializable for the manual trigger output.
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"status\":\"failed\""));
}
