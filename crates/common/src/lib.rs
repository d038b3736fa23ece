//! Shared types for the booking and subscription core.
//!
//! Everything here is plain data: identifiers, money in minor units and the
//! lifecycle enums persisted by the store and driven by the domain services.

pub mod lifecycle;
pub mod money;
pub mod types;

pub use lifecycle::{
    ContractState, MealPlan, ParseEnumError, PaymentStatus, SubscriptionStatus, TargetKind,
};
pub use money::Money;
pub use types::{
    CanteenId, ContractId, FeedbackId, HostelId, OwnerId, RoomId, SubscriptionId, TenantId,
    UserId,
};
