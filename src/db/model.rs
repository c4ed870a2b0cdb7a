//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Temporal
//! policy lives in `recurrence`; batch logic in `runner`.

use chrono::{NaiveDate, Weekday};

use crate::model::{parse_weekday, weekday_name, DeliveryTime, Frequency, SubscriptionStatus};
use crate::recurrence::RecurrenceRule;

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub customer_id: i64,
    pub distributor_id: i64,
    pub frequency: Frequency,
    pub delivery_days: Vec<Weekday>,
    pub delivery_day_of_month: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub delivery_time: DeliveryTime,
    pub delivery_address: Option<serde_json::Value>,
    pub special_instructions: Option<String>,
    pub items: Vec<NewSubscriptionItem>,
}

#[derive(Debug, Clone)]
pub struct NewSubscriptionItem {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub unit: String,
}

/// Line item loaded with a due subscription. Unit price is the snapshot
/// taken when the subscription was created.
#[derive(Debug, Clone)]
pub struct SubscriptionItem {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub unit: String,
}

/// Subscription slice the batch runner processes: recurrence configuration,
/// order-snapshot fields, and the loaded line items.
#[derive(Debug, Clone)]
pub struct DueSubscription {
    pub id: i64,
    pub customer_id: i64,
    pub distributor_id: i64,
    pub status: SubscriptionStatus,
    pub frequency: Frequency,
    pub delivery_days: Vec<Weekday>,
    pub delivery_day_of_month: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_delivery_date: Option<NaiveDate>,
    pub delivery_time: DeliveryTime,
    pub delivery_address: Option<String>,
    pub special_instructions: Option<String>,
    pub items: Vec<SubscriptionItem>,
}

impl DueSubscription {
    pub fn recurrence_rule(&self) -> RecurrenceRule {
        RecurrenceRule {
            frequency: self.frequency,
            delivery_days: self.delivery_days.clone(),
            delivery_day_of_month: self.delivery_day_of_month,
        }
    }
}

/// Full subscription record for dashboards and progress assertions.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub customer_id: i64,
    pub distributor_id: i64,
    pub status: SubscriptionStatus,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_delivery_date: Option<NaiveDate>,
    pub last_delivery_date: Option<NaiveDate>,
    pub total_deliveries: i64,
}

/// Generated-order slice for the derived per-subscription order list.
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub id: i64,
    pub order_number: String,
    pub delivery_date: NaiveDate,
    pub status: String,
    pub total_amount: f64,
}

/// Encode delivery days for the TEXT column: comma-separated lowercase names.
pub fn encode_delivery_days(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| weekday_name(*d))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode the TEXT column back into weekdays, ignoring unknown tokens.
pub fn decode_delivery_days(s: &str) -> Vec<Weekday> {
    s.split(',')
        .filter_map(|tok| parse_weekday(tok.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_days_round_trip() {
        let days = vec![Weekday::Mon, Weekday::Thu];
        assert_eq!(encode_delivery_days(&days), "monday,thursday");
        assert_eq!(decode_delivery_days("monday,thursday"), days);
        assert_eq!(decode_delivery_days(""), vec![]);
        assert_eq!(decode_delivery_days("monday,someday"), vec![Weekday::Mon]);
    }
}
