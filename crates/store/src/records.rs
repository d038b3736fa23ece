//! Rows persisted by the store.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::{
    CanteenId, ContractId, ContractState, FeedbackId, HostelId, MealPlan, Money, OwnerId,
    PaymentStatus, RoomId, SubscriptionId, SubscriptionStatus, TargetKind, TenantId, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A hostel with its derived room counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hostel {
    pub id: HostelId,
    pub owner_id: OwnerId,
    pub name: String,
    pub counters: HostelCounters,
    pub rating: RatingSummary,
}

impl Hostel {
    /// Creates a hostel with no rooms.
    pub fn new(owner_id: OwnerId, name: impl Into<String>) -> Self {
        Self {
            id: HostelId::new(),
            owner_id,
            name: name.into(),
            counters: HostelCounters::default(),
            rating: RatingSummary::default(),
        }
    }
}

/// `total_rooms` / `available_rooms` of a hostel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostelCounters {
    pub total_rooms: u32,
    pub available_rooms: u32,
}

/// A signed change to hostel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub total: i32,
    pub available: i32,
}

impl CounterDelta {
    pub fn available(delta: i32) -> Self {
        Self {
            total: 0,
            available: delta,
        }
    }
}

/// Outcome of an atomic counter adjustment.
///
/// `clamped` is set when a floor or cap had to be applied, which means the
/// stored counter had drifted from the rows it summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjusted<T> {
    pub before: T,
    pub after: T,
    pub clamped: bool,
}

impl HostelCounters {
    /// Recomputes counters from the rooms of a hostel.
    pub fn from_rooms<'a>(rooms: impl IntoIterator<Item = &'a Room>) -> Self {
        rooms.into_iter().fold(Self::default(), |mut acc, room| {
            acc.total_rooms += 1;
            if room.is_available {
                acc.available_rooms += 1;
            }
            acc
        })
    }

    /// Applies a delta with `total_rooms >= 0` and `0 <= available_rooms <= total_rooms`.
    pub fn apply(self, delta: CounterDelta) -> Adjusted<HostelCounters> {
        let total_raw = i64::from(self.total_rooms) + i64::from(delta.total);
        let total = total_raw.clamp(0, i64::from(u32::MAX));
        let available_raw = i64::from(self.available_rooms) + i64::from(delta.available);
        let available = available_raw.clamp(0, total);

        Adjusted {
            before: self,
            after: HostelCounters {
                total_rooms: total as u32,
                available_rooms: available as u32,
            },
            clamped: total != total_raw || available != available_raw,
        }
    }
}

/// Applies a delta to a subscriber count floored at zero.
pub fn adjust_count(count: u32, delta: i32) -> Adjusted<u32> {
    let raw = i64::from(count) + i64::from(delta);
    let after = raw.clamp(0, i64::from(u32::MAX));
    Adjusted {
        before: count,
        after: after as u32,
        clamped: after != raw,
    }
}

/// A rentable room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hostel_id: HostelId,
    pub label: String,
    pub capacity: u32,
    pub rent: Money,
    pub security_deposit: Money,
    pub is_available: bool,
    pub occupants: Vec<TenantId>,
}

impl Room {
    /// Creates an empty, available room.
    pub fn new(
        hostel_id: HostelId,
        label: impl Into<String>,
        capacity: u32,
        rent: Money,
        security_deposit: Money,
    ) -> Self {
        Self {
            id: RoomId::new(),
            hostel_id,
            label: label.into(),
            capacity,
            rent,
            security_deposit,
            is_available: true,
            occupants: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupants.len() >= self.capacity as usize
    }
}

/// Provider identifiers of the payment that funded a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub amount: Money,
}

/// Terms and penalty clauses attached to a contract at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub notice_period_days: u32,
    pub rent_due_day: u32,
    pub late_fee_per_day: Money,
    pub early_termination_penalty: Money,
    pub clauses: Vec<String>,
}

/// A booking contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub contract_number: String,
    pub tenant_id: TenantId,
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    /// Owner at creation time; later ownership changes do not rewrite it.
    pub owner_id: OwnerId,
    pub monthly_rent: Money,
    pub security_deposit: Money,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub state: ContractState,
    pub payment: PaymentReference,
    pub terms: ContractTerms,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// A tenant's claim on the booking flow between order creation and confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingIntent {
    pub tenant_id: TenantId,
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    pub amount: Money,
    /// Set once the provider has issued the order.
    pub provider_order_id: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

/// A canteen with its enabled plans and derived subscriber count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canteen {
    pub id: CanteenId,
    pub owner_id: OwnerId,
    pub name: String,
    /// Monthly price per enabled plan.
    pub plans: BTreeMap<MealPlan, Money>,
    pub subscriber_count: u32,
    pub rating: RatingSummary,
}

impl Canteen {
    pub fn new(owner_id: OwnerId, name: impl Into<String>) -> Self {
        Self {
            id: CanteenId::new(),
            owner_id,
            name: name.into(),
            plans: BTreeMap::new(),
            subscriber_count: 0,
            rating: RatingSummary::default(),
        }
    }

    pub fn with_plan(mut self, plan: MealPlan, monthly_price: Money) -> Self {
        self.plans.insert(plan, monthly_price);
        self
    }
}

/// A recurring meal plan subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub canteen_id: CanteenId,
    pub plan: MealPlan,
    pub duration_months: u32,
    pub monthly_price: Money,
    pub price: Money,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub provider_order_id: String,
    pub provider_payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The entity a piece of feedback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackTarget {
    pub kind: TargetKind,
    pub id: Uuid,
}

impl FeedbackTarget {
    pub fn new(kind: TargetKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for FeedbackTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One user's rating of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub user_id: UserId,
    pub target: FeedbackTarget,
    pub rating: f64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate rating carried by a rated entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rating: f64,
    pub review_count: u32,
}
