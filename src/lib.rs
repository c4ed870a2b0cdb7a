//! Recurring-subscription order generation engine for a dairy delivery
//! service. Turns standing subscriptions into concrete delivery orders on a
//! schedule: pure recurrence math in `recurrence`, transactional order
//! creation in `materializer`, the batch loop in `runner`, and the periodic
//! trigger in `scheduler`.

pub mod config;
pub mod db;
pub mod materializer;
pub mod model;
pub mod recurrence;
pub mod runner;
pub mod scheduler;
