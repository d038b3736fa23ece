//! Subscription Lifecycle Manager.
//!
//! Subscriptions are persisted as soon as the provider order exists, in
//! `pending`. Only a verified payment makes them `active` and counts them
//! towards the canteen's `subscriber_count`.

mod service;

pub use service::{ExpiryReport, SubscriptionOrder, SubscriptionService};

/// Longest subscription that can be bought in one order.
pub const MAX_DURATION_MONTHS: u32 = 12;
