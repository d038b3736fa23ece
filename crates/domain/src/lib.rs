//! Booking and payment reconciliation core.
//!
//! This crate owns the consistency rules of the marketplace:
//! - [`contract`]: room booking, payment confirmation and the contract state machine
//! - [`subscription`]: canteen meal subscriptions and their payments
//! - [`ledger`]: denormalized room and subscriber counters
//! - [`feedback`]: per-target rating aggregation
//!
//! Every check-then-write runs inside one store transaction, and no
//! transaction is held open across a call to the payment provider.

use chrono::{DateTime, SubsecRound, Utc};

pub mod contract;
pub mod error;
pub mod feedback;
pub mod ledger;
pub mod notify;
pub mod rooms;
pub mod subscription;

pub use contract::{BookingOrder, ConfirmBooking, ContractService};
pub use error::{DomainError, ErrorCategory, Result};
pub use feedback::{FeedbackReceipt, FeedbackService};
pub use ledger::{CanteenReconciliation, CounterLedger, HostelReconciliation};
pub use notify::{InMemoryNotifier, Notification, Notifier, NotifyError, TracingNotifier};
pub use rooms::{NewRoom, RoomService};
pub use subscription::{ExpiryReport, SubscriptionOrder, SubscriptionService};

/// Current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
