use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// How often a subscription delivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    TwiceWeek,
    AlternateDays,
    Weekly,
    Fortnightly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::TwiceWeek => "twice_week",
            Frequency::AlternateDays => "alternate_days",
            Frequency::Weekly => "weekly",
            Frequency::Fortnightly => "fortnightly",
            Frequency::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Frequency::Daily),
            "twice_week" => Some(Frequency::TwiceWeek),
            "alternate_days" => Some(Frequency::AlternateDays),
            "weekly" => Some(Frequency::Weekly),
            "fortnightly" => Some(Frequency::Fortnightly),
            "monthly" => Some(Frequency::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "paused" => Some(SubscriptionStatus::Paused),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "completed" => Some(SubscriptionStatus::Completed),
            _ => None,
        }
    }
}

/// One-way order state machine. CANCELLED is reachable from any
/// pre-delivery state; DELIVERED and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "IN_TRANSIT" => Some(OrderStatus::InTransit),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Pending, Confirmed) | (Confirmed, InTransit) | (InTransit, Delivered) => true,
            (Pending | Confirmed | InTransit, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryTime {
    Morning,
    Afternoon,
    Evening,
    Flexible,
}

impl DeliveryTime {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryTime::Morning => "morning",
            DeliveryTime::Afternoon => "afternoon",
            DeliveryTime::Evening => "evening",
            DeliveryTime::Flexible => "flexible",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(DeliveryTime::Morning),
            "afternoon" => Some(DeliveryTime::Afternoon),
            "evening" => Some(DeliveryTime::Evening),
            "flexible" => Some(DeliveryTime::Flexible),
            _ => None,
        }
    }
}

/// Parse a lowercase weekday name as stored in `delivery_days`.
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Outcome of one batch invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    AlreadyRunning,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub subscription_id: Option<i64>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral summary of one batch execution. Never persisted; returned to
/// the trigger and to the manual entry point for observability.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_examined: u64,
    pub orders_created: u64,
    pub errors: u64,
    pub error_details: Vec<RunError>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Completed,
            started_at,
            duration_secs: 0.0,
            total_examined: 0,
            orders_created: 0,
            errors: 0,
            error_details: Vec::new(),
        }
    }

    pub fn already_running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::AlreadyRunning,
            ..Self::new(started_at)
        }
    }

    pub fn record_error(&mut self, subscription_id: Option<i64>, error: impl Into<String>) {
        self.errors += 1;
        self.error_details.push(RunError {
            subscription_id,
            error: error.into(),
            timestamp: Utc::now(),
        });
    }
}
