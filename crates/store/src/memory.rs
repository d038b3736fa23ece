use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{
    CanteenId, ContractId, FeedbackId, HostelId, RoomId, SubscriptionId, TargetKind, TenantId,
};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use crate::store::{Store, StoreTx, constraints};
use crate::{
    Adjusted, BookingIntent, Canteen, Contract, CounterDelta, Feedback, FeedbackTarget, Hostel,
    HostelCounters, RatingSummary, Result, Room, StoreError, Subscription, adjust_count,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    hostels: HashMap<HostelId, Hostel>,
    rooms: HashMap<RoomId, Room>,
    contracts: HashMap<ContractId, Contract>,
    intents: HashMap<TenantId, BookingIntent>,
    canteens: HashMap<CanteenId, Canteen>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    feedback: HashMap<FeedbackId, Feedback>,
    order_ratings: HashMap<Uuid, RatingSummary>,
}

/// In-memory store for tests and local runs.
///
/// A transaction holds the write lock for its whole lifetime and works on a
/// copy of the state that replaces the original on commit, so transactions
/// are fully serialized and a dropped transaction leaves no trace.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a hostel's counters without any bookkeeping.
    ///
    /// Test hook for simulating drift between counters and rooms.
    pub async fn corrupt_hostel_counters(&self, id: HostelId, counters: HostelCounters) {
        if let Some(hostel) = self.state.write().await.hostels.get_mut(&id) {
            hostel.counters = counters;
        }
    }

    /// Overwrites a canteen's subscriber count without any bookkeeping.
    pub async fn corrupt_subscriber_count(&self, id: CanteenId, count: u32) {
        if let Some(canteen) = self.state.write().await.canteens.get_mut(&id) {
            canteen.subscriber_count = count;
        }
    }

    /// Returns the number of contracts stored.
    pub async fn contract_count(&self) -> usize {
        self.state.read().await.contracts.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().write_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

struct InMemoryTx {
    guard: OwnedRwLockWriteGuard<StoreState>,
    working: StoreState,
}

impl InMemoryTx {
    fn hostel_mut(&mut self, id: HostelId) -> Result<&mut Hostel> {
        self.working
            .hostels
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("hostel", id))
    }

    fn canteen_mut(&mut self, id: CanteenId) -> Result<&mut Canteen> {
        self.working
            .canteens
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("canteen", id))
    }

    fn check_contract_unique(&self, contract: &Contract) -> Result<()> {
        for other in self.working.contracts.values() {
            if other.id == contract.id {
                continue;
            }
            if other.payment.provider_order_id == contract.payment.provider_order_id {
                return Err(StoreError::unique(constraints::CONTRACT_PROVIDER_ORDER));
            }
            if contract.state.is_open()
                && other.state.is_open()
                && other.tenant_id == contract.tenant_id
            {
                return Err(StoreError::unique(constraints::CONTRACT_OPEN_PER_TENANT));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn get_hostel(&mut self, id: HostelId) -> Result<Option<Hostel>> {
        Ok(self.working.hostels.get(&id).cloned())
    }

    async fn insert_hostel(&mut self, hostel: &Hostel) -> Result<()> {
        if self.working.hostels.contains_key(&hostel.id) {
            return Err(StoreError::unique(constraints::HOSTEL_PKEY));
        }
        self.working.hostels.insert(hostel.id, hostel.clone());
        Ok(())
    }

    async fn adjust_hostel_counters(
        &mut self,
        id: HostelId,
        delta: CounterDelta,
    ) -> Result<Adjusted<HostelCounters>> {
        let hostel = self.hostel_mut(id)?;
        let adjusted = hostel.counters.apply(delta);
        hostel.counters = adjusted.after;
        Ok(adjusted)
    }

    async fn set_hostel_counters(
        &mut self,
        id: HostelId,
        counters: HostelCounters,
    ) -> Result<()> {
        self.hostel_mut(id)?.counters = counters;
        Ok(())
    }

    async fn get_room(&mut self, id: RoomId) -> Result<Option<Room>> {
        Ok(self.working.rooms.get(&id).cloned())
    }

    async fn list_rooms(&mut self, hostel_id: HostelId) -> Result<Vec<Room>> {
        let mut rooms: Vec<_> = self
            .working
            .rooms
            .values()
            .filter(|r| r.hostel_id == hostel_id)
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    async fn insert_room(&mut self, room: &Room) -> Result<()> {
        if !self.working.hostels.contains_key(&room.hostel_id) {
            return Err(StoreError::not_found("hostel", room.hostel_id));
        }
        if self.working.rooms.contains_key(&room.id) {
            return Err(StoreError::unique(constraints::ROOM_PKEY));
        }
        self.working.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn update_room(&mut self, room: &Room) -> Result<()> {
        let slot = self
            .working
            .rooms
            .get_mut(&room.id)
            .ok_or_else(|| StoreError::not_found("room", room.id))?;
        *slot = room.clone();
        Ok(())
    }

    async fn delete_room(&mut self, id: RoomId) -> Result<()> {
        self.working
            .rooms
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("room", id))
    }

    async fn get_contract(&mut self, id: ContractId) -> Result<Option<Contract>> {
        Ok(self.working.contracts.get(&id).cloned())
    }

    async fn find_contract_by_provider_order(
        &mut self,
        provider_order_id: &str,
    ) -> Result<Option<Contract>> {
        Ok(self
            .working
            .contracts
            .values()
            .find(|c| c.payment.provider_order_id == provider_order_id)
            .cloned())
    }

    async fn find_open_contract(&mut self, tenant_id: TenantId) -> Result<Option<Contract>> {
        Ok(self
            .working
            .contracts
            .values()
            .find(|c| c.tenant_id == tenant_id && c.state.is_open())
            .cloned())
    }

    async fn list_contracts_for_tenant(&mut self, tenant_id: TenantId) -> Result<Vec<Contract>> {
        let mut contracts: Vec<_> = self
            .working
            .contracts
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        contracts.sort_by_key(|c| c.created_at);
        Ok(contracts)
    }

    async fn insert_contract(&mut self, contract: &Contract) -> Result<()> {
        if self.working.contracts.contains_key(&contract.id) {
            return Err(StoreError::unique("contracts_pkey"));
        }
        self.check_contract_unique(contract)?;
        self.working.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    async fn update_contract(&mut self, contract: &Contract) -> Result<()> {
        if !self.working.contracts.contains_key(&contract.id) {
            return Err(StoreError::not_found("contract", contract.id));
        }
        self.check_contract_unique(contract)?;
        self.working.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    async fn get_booking_intent(&mut self, tenant_id: TenantId) -> Result<Option<BookingIntent>> {
        Ok(self.working.intents.get(&tenant_id).cloned())
    }

    async fn claim_booking_intent(
        &mut self,
        intent: &BookingIntent,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(existing) = self.working.intents.get(&intent.tenant_id)
            && existing.provider_order_id.is_none()
            && existing.claimed_at >= stale_before
        {
            return Ok(false);
        }
        self.working
            .intents
            .insert(intent.tenant_id, intent.clone());
        Ok(true)
    }

    async fn put_booking_intent(&mut self, intent: &BookingIntent) -> Result<()> {
        let slot = self
            .working
            .intents
            .get_mut(&intent.tenant_id)
            .ok_or_else(|| StoreError::not_found("booking intent", intent.tenant_id))?;
        *slot = intent.clone();
        Ok(())
    }

    async fn delete_booking_intent(&mut self, tenant_id: TenantId) -> Result<()> {
        self.working.intents.remove(&tenant_id);
        Ok(())
    }

    async fn get_canteen(&mut self, id: CanteenId) -> Result<Option<Canteen>> {
        Ok(self.working.canteens.get(&id).cloned())
    }

    async fn insert_canteen(&mut self, canteen: &Canteen) -> Result<()> {
        if self.working.canteens.contains_key(&canteen.id) {
            return Err(StoreError::unique(constraints::CANTEEN_PKEY));
        }
        self.working.canteens.insert(canteen.id, canteen.clone());
        Ok(())
    }

    async fn adjust_subscriber_count(
        &mut self,
        id: CanteenId,
        delta: i32,
    ) -> Result<Adjusted<u32>> {
        let canteen = self.canteen_mut(id)?;
        let adjusted = adjust_count(canteen.subscriber_count, delta);
        canteen.subscriber_count = adjusted.after;
        Ok(adjusted)
    }

    async fn set_subscriber_count(&mut self, id: CanteenId, count: u32) -> Result<()> {
        self.canteen_mut(id)?.subscriber_count = count;
        Ok(())
    }

    async fn get_subscription(&mut self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.working.subscriptions.get(&id).cloned())
    }

    async fn list_subscriptions_for_canteen(
        &mut self,
        canteen_id: CanteenId,
    ) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<_> = self
            .working
            .subscriptions
            .values()
            .filter(|s| s.canteen_id == canteen_id)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    async fn find_live_subscription(
        &mut self,
        tenant_id: TenantId,
        canteen_id: CanteenId,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .working
            .subscriptions
            .values()
            .find(|s| s.tenant_id == tenant_id && s.canteen_id == canteen_id && s.status.is_live())
            .cloned())
    }

    async fn list_live_subscriptions_ending_before(
        &mut self,
        date: NaiveDate,
    ) -> Result<Vec<Subscription>> {
        let mut due: Vec<_> = self
            .working
            .subscriptions
            .values()
            .filter(|s| s.status.is_live() && s.end_date < date)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.end_date);
        Ok(due)
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        if self
            .working
            .subscriptions
            .values()
            .any(|s| s.provider_order_id == subscription.provider_order_id)
        {
            return Err(StoreError::unique(constraints::SUBSCRIPTION_PROVIDER_ORDER));
        }
        if !self.working.canteens.contains_key(&subscription.canteen_id) {
            return Err(StoreError::not_found("canteen", subscription.canteen_id));
        }
        self.working
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        let slot = self
            .working
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or_else(|| StoreError::not_found("subscription", subscription.id))?;
        *slot = subscription.clone();
        Ok(())
    }

    async fn lock_feedback_target(&mut self, _target: FeedbackTarget) -> Result<()> {
        // The transaction already holds the store's write lock.
        Ok(())
    }

    async fn list_feedback(&mut self, target: FeedbackTarget) -> Result<Vec<Feedback>> {
        let mut rows: Vec<_> = self
            .working
            .feedback
            .values()
            .filter(|f| f.target == target)
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.updated_at);
        Ok(rows)
    }

    async fn upsert_feedback(&mut self, feedback: &Feedback) -> Result<Feedback> {
        let existing = self
            .working
            .feedback
            .values_mut()
            .find(|f| f.user_id == feedback.user_id && f.target == feedback.target);
        let stored = match existing {
            Some(row) => {
                row.rating = feedback.rating;
                row.comment = feedback.comment.clone();
                row.updated_at = feedback.updated_at;
                row.clone()
            }
            None => {
                self.working.feedback.insert(feedback.id, feedback.clone());
                feedback.clone()
            }
        };
        Ok(stored)
    }

    async fn get_rating(&mut self, target: FeedbackTarget) -> Result<Option<RatingSummary>> {
        let rating = match target.kind {
            TargetKind::Hostel => self
                .working
                .hostels
                .get(&HostelId::from_uuid(target.id))
                .map(|h| h.rating),
            TargetKind::Canteen => self
                .working
                .canteens
                .get(&CanteenId::from_uuid(target.id))
                .map(|c| c.rating),
            TargetKind::Order => self.working.order_ratings.get(&target.id).copied(),
        };
        Ok(rating)
    }

    async fn set_rating(
        &mut self,
        target: FeedbackTarget,
        summary: RatingSummary,
    ) -> Result<bool> {
        let slot = match target.kind {
            TargetKind::Hostel => self
                .working
                .hostels
                .get_mut(&HostelId::from_uuid(target.id))
                .map(|h| &mut h.rating),
            TargetKind::Canteen => self
                .working
                .canteens
                .get_mut(&CanteenId::from_uuid(target.id))
                .map(|c| &mut c.rating),
            TargetKind::Order => Some(self.working.order_ratings.entry(target.id).or_default()),
        };
        match slot {
            Some(rating) => {
                *rating = summary;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
