use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{CanteenId, ContractId, HostelId, RoomId, SubscriptionId, TenantId};

use crate::{
    Adjusted, BookingIntent, Canteen, Contract, CounterDelta, Feedback, FeedbackTarget, Hostel,
    HostelCounters, RatingSummary, Result, Room, Subscription,
};

/// Names of the uniqueness constraints every implementation enforces.
///
/// PostgreSQL reports these names on violation; the in-memory store reports
/// the same names so callers can match on them regardless of backend.
pub mod constraints {
    /// At most one contract per provider order identifier.
    pub const CONTRACT_PROVIDER_ORDER: &str = "contracts_provider_order_id_key";
    /// At most one contract per tenant in draft, pending_signatures or active.
    pub const CONTRACT_OPEN_PER_TENANT: &str = "contracts_one_open_per_tenant";
    /// At most one subscription per provider order identifier.
    pub const SUBSCRIPTION_PROVIDER_ORDER: &str = "subscriptions_provider_order_id_key";
    /// At most one feedback row per (user, target).
    pub const FEEDBACK_USER_TARGET: &str = "feedback_user_target_key";
    pub const HOSTEL_PKEY: &str = "hostels_pkey";
    pub const ROOM_PKEY: &str = "rooms_pkey";
    pub const CANTEEN_PKEY: &str = "canteens_pkey";
}

/// Entry point to the persistent store.
///
/// All reads and writes happen through a [`StoreTx`]. The store is the sole
/// arbiter of consistency: a check made through a transaction still holds
/// when that transaction's writes are committed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Starts a unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// A unit of work against the store.
///
/// Rows fetched through `get_*` are locked against concurrent writers until
/// the transaction ends. Writes become visible atomically on
/// [`StoreTx::commit`]; dropping the transaction rolls everything back.
///
/// Never hold a transaction open across a call to the payment provider.
#[async_trait]
pub trait StoreTx: Send {
    async fn get_hostel(&mut self, id: HostelId) -> Result<Option<Hostel>>;

    async fn insert_hostel(&mut self, hostel: &Hostel) -> Result<()>;

    /// Atomically applies `delta` with a floor of zero and
    /// `available_rooms <= total_rooms`.
    async fn adjust_hostel_counters(
        &mut self,
        id: HostelId,
        delta: CounterDelta,
    ) -> Result<Adjusted<HostelCounters>>;

    /// Overwrites both counters. Only the reconciliation path uses this.
    async fn set_hostel_counters(&mut self, id: HostelId, counters: HostelCounters)
    -> Result<()>;

    async fn get_room(&mut self, id: RoomId) -> Result<Option<Room>>;

    /// Lists the rooms of a hostel without locking them.
    async fn list_rooms(&mut self, hostel_id: HostelId) -> Result<Vec<Room>>;

    /// Lists the rooms of a hostel and locks them until the transaction ends.
    ///
    /// Room locks are taken before the hostel's, as in the occupancy path.
    async fn lock_rooms(&mut self, hostel_id: HostelId) -> Result<Vec<Room>> {
        self.list_rooms(hostel_id).await
    }

    async fn insert_room(&mut self, room: &Room) -> Result<()>;

    async fn update_room(&mut self, room: &Room) -> Result<()>;

    async fn delete_room(&mut self, id: RoomId) -> Result<()>;

    async fn get_contract(&mut self, id: ContractId) -> Result<Option<Contract>>;

    async fn find_contract_by_provider_order(
        &mut self,
        provider_order_id: &str,
    ) -> Result<Option<Contract>>;

    /// Returns the tenant's contract in draft, pending_signatures or active, if any.
    async fn find_open_contract(&mut self, tenant_id: TenantId) -> Result<Option<Contract>>;

    async fn list_contracts_for_tenant(&mut self, tenant_id: TenantId) -> Result<Vec<Contract>>;

    /// Inserts a contract, enforcing [`constraints::CONTRACT_PROVIDER_ORDER`]
    /// and [`constraints::CONTRACT_OPEN_PER_TENANT`].
    async fn insert_contract(&mut self, contract: &Contract) -> Result<()>;

    async fn update_contract(&mut self, contract: &Contract) -> Result<()>;

    async fn get_booking_intent(&mut self, tenant_id: TenantId) -> Result<Option<BookingIntent>>;

    /// Claims the booking flow for `intent.tenant_id`.
    ///
    /// Succeeds (returns true) when the tenant has no intent, or the existing
    /// one already carries a provider order, or it was claimed before
    /// `stale_before`. Returns false while another claim is in flight.
    async fn claim_booking_intent(
        &mut self,
        intent: &BookingIntent,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Replaces the tenant's existing booking intent.
    async fn put_booking_intent(&mut self, intent: &BookingIntent) -> Result<()>;

    async fn delete_booking_intent(&mut self, tenant_id: TenantId) -> Result<()>;

    async fn get_canteen(&mut self, id: CanteenId) -> Result<Option<Canteen>>;

    async fn insert_canteen(&mut self, canteen: &Canteen) -> Result<()>;

    /// Atomically applies `delta` to the subscriber count with a floor of zero.
    async fn adjust_subscriber_count(&mut self, id: CanteenId, delta: i32)
    -> Result<Adjusted<u32>>;

    /// Overwrites the subscriber count. Only the reconciliation path uses this.
    async fn set_subscriber_count(&mut self, id: CanteenId, count: u32) -> Result<()>;

    async fn get_subscription(&mut self, id: SubscriptionId) -> Result<Option<Subscription>>;

    async fn list_subscriptions_for_canteen(
        &mut self,
        canteen_id: CanteenId,
    ) -> Result<Vec<Subscription>>;

    /// Returns the tenant's active or paused subscription to a canteen, if any.
    async fn find_live_subscription(
        &mut self,
        tenant_id: TenantId,
        canteen_id: CanteenId,
    ) -> Result<Option<Subscription>>;

    /// Lists active or paused subscriptions whose end date is before `date`.
    async fn list_live_subscriptions_ending_before(
        &mut self,
        date: NaiveDate,
    ) -> Result<Vec<Subscription>>;

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<()>;

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<()>;

    /// Holds off other feedback writers on `target` until this transaction
    /// ends.
    async fn lock_feedback_target(&mut self, target: FeedbackTarget) -> Result<()>;

    async fn list_feedback(&mut self, target: FeedbackTarget) -> Result<Vec<Feedback>>;

    /// Writes a user's feedback on a target. A row already held by the same
    /// (user, target) pair, see [`constraints::FEEDBACK_USER_TARGET`], keeps
    /// its id and `created_at` and takes the new rating, comment and
    /// `updated_at`. Returns the stored row.
    async fn upsert_feedback(&mut self, feedback: &Feedback) -> Result<Feedback>;

    /// Reads the aggregate rating stored on a target.
    async fn get_rating(&mut self, target: FeedbackTarget) -> Result<Option<RatingSummary>>;

    /// Writes the aggregate rating onto the target's row.
    ///
    /// Returns false if the target does not exist. Order targets live outside
    /// this store, so their summaries are always written.
    async fn set_rating(&mut self, target: FeedbackTarget, summary: RatingSummary)
    -> Result<bool>;

    /// Makes every write of this transaction visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Convenience lookups that each run in their own short transaction.
#[async_trait]
pub trait StoreExt: Store {
    async fn hostel(&self, id: HostelId) -> Result<Option<Hostel>> {
        let mut tx = self.begin().await?;
        tx.get_hostel(id).await
    }

    async fn room(&self, id: RoomId) -> Result<Option<Room>> {
        let mut tx = self.begin().await?;
        tx.get_room(id).await
    }

    async fn rooms(&self, hostel_id: HostelId) -> Result<Vec<Room>> {
        let mut tx = self.begin().await?;
        tx.list_rooms(hostel_id).await
    }

    async fn contract(&self, id: ContractId) -> Result<Option<Contract>> {
        let mut tx = self.begin().await?;
        tx.get_contract(id).await
    }

    async fn contracts_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<Contract>> {
        let mut tx = self.begin().await?;
        tx.list_contracts_for_tenant(tenant_id).await
    }

    async fn booking_intent(&self, tenant_id: TenantId) -> Result<Option<BookingIntent>> {
        let mut tx = self.begin().await?;
        tx.get_booking_intent(tenant_id).await
    }

    async fn canteen(&self, id: CanteenId) -> Result<Option<Canteen>> {
        let mut tx = self.begin().await?;
        tx.get_canteen(id).await
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let mut tx = self.begin().await?;
        tx.get_subscription(id).await
    }

    async fn subscriptions_for_canteen(&self, canteen_id: CanteenId) -> Result<Vec<Subscription>> {
        let mut tx = self.begin().await?;
        tx.list_subscriptions_for_canteen(canteen_id).await
    }

    async fn feedback_for(&self, target: FeedbackTarget) -> Result<Vec<Feedback>> {
        let mut tx = self.begin().await?;
        tx.list_feedback(target).await
    }

    async fn rating(&self, target: FeedbackTarget) -> Result<Option<RatingSummary>> {
        let mut tx = self.begin().await?;
        tx.get_rating(target).await
    }
}

// Blanket implementation for all Store implementations
impl<T: Store + ?Sized> StoreExt for T {}
