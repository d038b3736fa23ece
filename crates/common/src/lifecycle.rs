//! Lifecycle enums shared by the store and the domain services.
//!
//! Each enum has a stable snake_case wire/storage name (`as_str`) and parses
//! back from it (`FromStr`).

use serde::{Deserialize, Serialize};

/// Error returned when a stored or submitted name does not map to a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

macro_rules! named_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the storage name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// The state of a booking contract.
///
/// State transitions:
/// ```text
/// Draft ─────────────┐
///                    ▼
/// PendingSignatures ─┬──► Active ──► Terminated
///                    ├──► Rejected
///                    └──► Terminated (cancelled before owner action)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    /// Pre-payment placeholder created by an external drafting flow.
    Draft,

    /// Payment verified, awaiting the owner's decision.
    PendingSignatures,

    /// Approved by the owner; the tenant occupies the room.
    Active,

    /// Declined by the owner before activation (terminal).
    Rejected,

    /// Ended after creation by cancellation or after activation (terminal).
    Terminated,
}

named_enum!(ContractState, "contract state", {
    Draft => "draft",
    PendingSignatures => "pending_signatures",
    Active => "active",
    Rejected => "rejected",
    Terminated => "terminated",
});

impl ContractState {
    /// States that count towards the one-open-contract-per-tenant rule.
    pub const OPEN: [ContractState; 3] = [
        ContractState::Draft,
        ContractState::PendingSignatures,
        ContractState::Active,
    ];

    /// Returns true if the contract still counts as the tenant's booking.
    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn can_approve(&self) -> bool {
        matches!(self, ContractState::PendingSignatures)
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, ContractState::PendingSignatures | ContractState::Active)
    }

    pub fn can_cancel(&self) -> bool {
        self.is_open()
    }

    /// Returns true if the tenant occupies the room in this state.
    pub fn occupies_room(&self) -> bool {
        matches!(self, ContractState::Active)
    }
}

/// Lifecycle status of a meal subscription.
///
/// ```text
/// Pending ──► Active ◄──► Paused
///    │          │           │
///    └──────────┴───────────┴──► Cancelled / Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
    Expired,
}

named_enum!(SubscriptionStatus, "subscription status", {
    Pending => "pending",
    Active => "active",
    Paused => "paused",
    Cancelled => "cancelled",
    Expired => "expired",
});

impl SubscriptionStatus {
    /// Returns true if this subscription is counted in the canteen's subscribers.
    pub fn counts_as_subscriber(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    /// Returns true if the tenant still holds this plan (active or on hold).
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

/// Payment status of a meal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

named_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
});

/// Meal combinations a canteen can offer as a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealPlan {
    Breakfast,
    Lunch,
    Dinner,
    BreakfastLunch,
    LunchDinner,
    BreakfastDinner,
    AllMeals,
}

named_enum!(MealPlan, "meal plan", {
    Breakfast => "breakfast",
    Lunch => "lunch",
    Dinner => "dinner",
    BreakfastLunch => "breakfast_lunch",
    LunchDinner => "lunch_dinner",
    BreakfastDinner => "breakfast_dinner",
    AllMeals => "all_meals",
});

/// Kinds of entity that carry an aggregate rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Hostel,
    Canteen,
    Order,
}

named_enum!(TargetKind, "feedback target", {
    Hostel => "hostel",
    Canteen => "canteen",
    Order => "order",
});
