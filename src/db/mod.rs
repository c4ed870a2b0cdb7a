//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed row and view structs returned by repositories.
//! - `repo`: SQL-only functions that map rows into those structs.
//!
//! External modules should import from `milkrun::db` — we re-export the
//! repository API and commonly used models for convenience.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{DueSubscription, NewSubscription, NewSubscriptionItem, SubscriptionItem};
