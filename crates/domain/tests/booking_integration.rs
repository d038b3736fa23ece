//! Integration tests for room bookings and the contract lifecycle.
//!
//! These run the services against the in-memory store and payment gateway
//! and check the counters after every step.

use std::sync::Arc;

use async_trait::async_trait;
use common::{ContractState, HostelId, Money, OwnerId, RoomId, TenantId, UserId};
use domain::{
    ConfirmBooking, ContractService, DomainError, ErrorCategory, InMemoryNotifier, NewRoom,
    Notification, RoomService,
};
use futures_util::future::join_all;
use payments::{
    InMemoryPaymentGateway, OrderRequest, PaymentConfirmation, PaymentGateway, ProviderOrder,
    SignatureLayout,
};
use store::{HostelCounters, InMemoryStore, StoreExt};
use tokio::sync::{Notify, Semaphore};

const SECRET: &str = "booking_test_secret";

struct Fixture<G: PaymentGateway = InMemoryPaymentGateway> {
    store: InMemoryStore,
    gateway: InMemoryPaymentGateway,
    notifier: InMemoryNotifier,
    rooms: RoomService<InMemoryStore>,
    contracts: ContractService<InMemoryStore, G>,
    owner: OwnerId,
    hostel_id: HostelId,
}

impl Fixture {
    async fn new() -> Self {
        let gateway = InMemoryPaymentGateway::new(SECRET);
        Self::with_gateway(gateway.clone(), gateway).await
    }
}

impl<G: PaymentGateway> Fixture<G> {
    async fn with_gateway(gateway: InMemoryPaymentGateway, contract_gateway: G) -> Self {
        let store = InMemoryStore::new();
        let notifier = InMemoryNotifier::new();
        let rooms = RoomService::new(store.clone());
        let contracts =
            ContractService::new(store.clone(), contract_gateway, Arc::new(notifier.clone()));
        let owner = OwnerId::new();
        let hostel = rooms
            .register_hostel(owner, "Sunrise Hostel".to_string())
            .await
            .unwrap();

        Self {
            store,
            gateway,
            notifier,
            rooms,
            contracts,
            owner,
            hostel_id: hostel.id,
        }
    }

    async fn add_room(&self, capacity: u32) -> RoomId {
        let room = NewRoom {
            label: format!("R-{capacity}"),
            capacity,
            rent: Money::from_major(1000),
            security_deposit: Money::from_major(500),
        };
        self.rooms
            .add_room(self.owner.into(), self.hostel_id, room)
            .await
            .unwrap()
            .id
    }

    async fn counters(&self) -> HostelCounters {
        self.store
            .hostel(self.hostel_id)
            .await
            .unwrap()
            .unwrap()
            .counters
    }

    async fn initiate_and_pay(
        &self,
        tenant: TenantId,
        room_id: RoomId,
    ) -> Result<ConfirmBooking, DomainError> {
        let order = self
            .contracts
            .initiate_booking(tenant, room_id, self.hostel_id)
            .await?;
        let confirmation = self
            .gateway
            .pay(&order.provider_order.id, SignatureLayout::PaymentThenOrder)
            .unwrap();
        Ok(self.confirm_cmd(tenant, room_id, confirmation))
    }

    fn confirm_cmd(
        &self,
        tenant: TenantId,
        room_id: RoomId,
        confirmation: PaymentConfirmation,
    ) -> ConfirmBooking {
        ConfirmBooking {
            tenant_id: tenant,
            room_id,
            hostel_id: self.hostel_id,
            confirmation,
            start_date: None,
            duration_months: None,
        }
    }

    async fn book(&self, tenant: TenantId, room_id: RoomId) -> store::Contract {
        let cmd = self.initiate_and_pay(tenant, room_id).await.unwrap();
        self.contracts.confirm_booking(cmd).await.unwrap()
    }
}

fn counters(total: u32, available: u32) -> HostelCounters {
    HostelCounters {
        total_rooms: total,
        available_rooms: available,
    }
}

async fn delivered(notifier: &InMemoryNotifier, count: usize) -> Vec<Notification> {
    for _ in 0..100 {
        let sent = notifier.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::task::yield_now().await;
    }
    notifier.sent()
}

mod booking {
    use super::*;

    #[tokio::test]
    async fn initiation_charges_rent_plus_deposit() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;

        let order = fx
            .contracts
            .initiate_booking(TenantId::new(), room_id, fx.hostel_id)
            .await
            .unwrap();

        assert_eq!(order.amount, Money::from_major(1500));
        assert_eq!(order.provider_order.amount, Money::from_major(1500));
        assert_eq!(fx.gateway.order_count(), 1);
    }

    #[tokio::test]
    async fn confirmation_creates_pending_contract_without_occupying() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();

        let contract = fx.book(tenant, room_id).await;

        assert_eq!(contract.state, ContractState::PendingSignatures);
        assert_eq!(contract.owner_id, fx.owner);
        assert_eq!(contract.payment.amount, Money::from_major(1500));
        assert!(contract.contract_number.starts_with("CTR-"));
        assert!(contract.end_date > contract.start_date);
        assert_eq!(fx.counters().await, counters(1, 1));
        let room = fx.store.room(room_id).await.unwrap().unwrap();
        assert!(room.is_available);
        assert!(fx.store.booking_intent(tenant).await.unwrap().is_none());

        let sent = delivered(&fx.notifier, 1).await;
        assert!(matches!(
            sent.as_slice(),
            [Notification::BookingConfirmed { contract_id, .. }] if *contract_id == contract.id
        ));
    }

    #[tokio::test]
    async fn confirming_twice_returns_the_same_contract() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        let cmd = fx.initiate_and_pay(tenant, room_id).await.unwrap();

        let first = fx.contracts.confirm_booking(cmd.clone()).await.unwrap();
        let second = fx.contracts.confirm_booking(cmd).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.store.contract_count().await, 1);
        assert_eq!(fx.counters().await, counters(1, 1));
    }

    #[tokio::test]
    async fn concurrent_confirmations_create_one_contract() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        let cmd = fx.initiate_and_pay(tenant, room_id).await.unwrap();

        let results = join_all((0..8).map(|_| fx.contracts.confirm_booking(cmd.clone()))).await;

        let contracts: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert!(contracts.iter().all(|c| c.id == contracts[0].id));
        assert_eq!(fx.store.contract_count().await, 1);

        fx.contracts
            .approve(contracts[0].id, fx.owner.into())
            .await
            .unwrap();
        assert_eq!(fx.counters().await, counters(1, 0));
    }

    #[tokio::test]
    async fn payment_of_another_tenant_is_rejected() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let cmd = fx.initiate_and_pay(TenantId::new(), room_id).await.unwrap();
        fx.contracts.confirm_booking(cmd.clone()).await.unwrap();

        let stolen = ConfirmBooking {
            tenant_id: TenantId::new(),
            ..cmd
        };
        let err = fx.contracts.confirm_booking(stolen).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Authorization);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let mut cmd = fx.initiate_and_pay(TenantId::new(), room_id).await.unwrap();
        let last = cmd.confirmation.signature.pop().unwrap();
        cmd.confirmation
            .signature
            .push(if last == '0' { '1' } else { '0' });

        let err = fx.contracts.confirm_booking(cmd).await.unwrap_err();

        assert!(matches!(err, DomainError::InvalidSignature));
        assert_eq!(fx.store.contract_count().await, 0);
    }

    #[tokio::test]
    async fn confirmation_without_matching_order_is_rejected() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        let confirmation = fx
            .gateway
            .pay("order_unknown", SignatureLayout::PaymentThenOrder)
            .unwrap();

        let err = fx
            .contracts
            .confirm_booking(fx.confirm_cmd(tenant, room_id, confirmation))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn payment_for_a_replaced_order_is_superseded() {
        let fx = Fixture::new().await;
        let first_room = fx.add_room(1).await;
        let second_room = fx.add_room(2).await;
        let tenant = TenantId::new();

        let stale = fx.initiate_and_pay(tenant, first_room).await.unwrap();
        let current = fx.initiate_and_pay(tenant, second_room).await.unwrap();

        let err = fx.contracts.confirm_booking(stale).await.unwrap_err();
        assert!(matches!(err, DomainError::OrderSuperseded(_)));
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let contract = fx.contracts.confirm_booking(current).await.unwrap();
        assert_eq!(contract.room_id, second_room);
    }

    #[tokio::test]
    async fn tenant_with_open_contract_cannot_book_again() {
        let fx = Fixture::new().await;
        let first_room = fx.add_room(1).await;
        let second_room = fx.add_room(1).await;
        let tenant = TenantId::new();
        fx.book(tenant, first_room).await;

        let err = fx
            .contracts
            .initiate_booking(tenant, second_room, fx.hostel_id)
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::DuplicateActiveBooking(t) if t == tenant));
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let fx = Fixture::new().await;

        let err = fx
            .contracts
            .initiate_booking(TenantId::new(), RoomId::new(), fx.hostel_id)
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn provider_timeout_is_outcome_unknown_and_releases_claim() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        fx.gateway.set_timeout_on_create(true);

        let err = fx
            .contracts
            .initiate_booking(tenant, room_id, fx.hostel_id)
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::PaymentOutcomeUnknown(_)));
        assert!(fx.store.booking_intent(tenant).await.unwrap().is_none());

        fx.gateway.set_timeout_on_create(false);
        fx.contracts
            .initiate_booking(tenant, room_id, fx.hostel_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn provider_rejection_is_service_unavailable() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        fx.gateway.set_fail_on_create(true);

        let err = fx
            .contracts
            .initiate_booking(TenantId::new(), room_id, fx.hostel_id)
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::ServiceUnavailable);
    }
}

mod claims {
    use super::*;

    /// Gateway that parks order creation until the test lets it through.
    #[derive(Clone)]
    struct GatedGateway {
        inner: InMemoryPaymentGateway,
        entered: Arc<Notify>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl PaymentGateway for GatedGateway {
        async fn create_order(&self, request: OrderRequest) -> payments::Result<ProviderOrder> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.create_order(request).await
        }

        async fn verify_confirmation(
            &self,
            confirmation: &PaymentConfirmation,
            layout: SignatureLayout,
        ) -> payments::Result<bool> {
            self.inner.verify_confirmation(confirmation, layout).await
        }
    }

    #[tokio::test]
    async fn in_flight_initiation_blocks_a_second_one() {
        let inner = InMemoryPaymentGateway::new(SECRET);
        let gated = GatedGateway {
            inner: inner.clone(),
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
        };
        let fx = Arc::new(Fixture::with_gateway(inner, gated.clone()).await);
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();

        let first = tokio::spawn({
            let fx = Arc::clone(&fx);
            async move {
                fx.contracts
                    .initiate_booking(tenant, room_id, fx.hostel_id)
                    .await
            }
        });
        gated.entered.notified().await;

        let err = fx
            .contracts
            .initiate_booking(tenant, room_id, fx.hostel_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateActiveBooking(_)));

        gated.gate.add_permits(1);
        let order = first.await.unwrap().unwrap();
        let intent = fx.store.booking_intent(tenant).await.unwrap().unwrap();
        assert_eq!(intent.provider_order_id, Some(order.provider_order.id));
        assert_eq!(fx.gateway.order_count(), 1);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn approval_occupies_and_rejection_releases() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        let contract = fx.book(tenant, room_id).await;

        let approved = fx
            .contracts
            .approve(contract.id, fx.owner.into())
            .await
            .unwrap();
        assert_eq!(approved.state, ContractState::Active);
        assert!(approved.approved_at.is_some());
        assert_eq!(fx.counters().await, counters(1, 0));
        let room = fx.store.room(room_id).await.unwrap().unwrap();
        assert!(!room.is_available);
        assert_eq!(room.occupants, vec![tenant]);

        let terminated = fx
            .contracts
            .reject(contract.id, fx.owner.into())
            .await
            .unwrap();
        assert_eq!(terminated.state, ContractState::Terminated);
        assert!(terminated.closed_at.is_some());
        assert_eq!(fx.counters().await, counters(1, 1));
        let room = fx.store.room(room_id).await.unwrap().unwrap();
        assert!(room.is_available);
        assert!(room.occupants.is_empty());
    }

    #[tokio::test]
    async fn approved_room_turns_away_the_next_confirmation() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        let cmd_a = fx.initiate_and_pay(tenant_a, room_id).await.unwrap();
        let contract_a = fx.contracts.confirm_booking(cmd_a).await.unwrap();
        assert_eq!(fx.counters().await, counters(1, 1));

        // Rooms are not reserved before approval, so B still gets an order.
        let cmd_b = fx.initiate_and_pay(tenant_b, room_id).await.unwrap();

        fx.contracts
            .approve(contract_a.id, fx.owner.into())
            .await
            .unwrap();
        assert_eq!(fx.counters().await, counters(1, 0));

        let err = fx.contracts.confirm_booking(cmd_b).await.unwrap_err();
        assert!(matches!(err, DomainError::RoomUnavailable(r) if r == room_id));
        assert_eq!(fx.counters().await, counters(1, 0));
    }

    #[tokio::test]
    async fn competing_approvals_fill_the_room_once() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let contract_a = fx.book(tenant_a, room_id).await;
        let contract_b = fx.book(tenant_b, room_id).await;
        assert_eq!(fx.counters().await, counters(1, 1));

        let (a, b) = tokio::join!(
            fx.contracts.approve(contract_a.id, fx.owner.into()),
            fx.contracts.approve(contract_b.id, fx.owner.into()),
        );

        let results = [a, b];
        let approved: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(approved.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert!(matches!(
            rejected[0],
            DomainError::CapacityExceeded { room_id: r, capacity: 1 } if *r == room_id
        ));

        let room = fx.store.room(room_id).await.unwrap().unwrap();
        assert_eq!(room.occupants, vec![approved[0].tenant_id]);
        assert_eq!(fx.counters().await, counters(1, 0));

        let loser = if approved[0].id == contract_a.id {
            contract_b.id
        } else {
            contract_a.id
        };
        let loser = fx.store.contract(loser).await.unwrap().unwrap();
        assert_eq!(loser.state, ContractState::PendingSignatures);
    }

    #[tokio::test]
    async fn only_the_owner_approves() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        let contract = fx.book(tenant, room_id).await;

        let err = fx
            .contracts
            .approve(contract.id, tenant.into())
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Unauthorized(_)));
        assert_eq!(fx.counters().await, counters(1, 1));
    }

    #[tokio::test]
    async fn tenant_cancel_of_pending_contract_keeps_the_record() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let tenant = TenantId::new();
        let contract = fx.book(tenant, room_id).await;

        let cancelled = fx
            .contracts
            .cancel(contract.id, tenant.into())
            .await
            .unwrap();

        assert_eq!(cancelled.state, ContractState::Terminated);
        assert_eq!(fx.counters().await, counters(1, 1));
        assert_eq!(
            fx.contracts.contracts_for_tenant(tenant).await.unwrap(),
            vec![cancelled]
        );

        // A closed contract no longer blocks a new booking.
        fx.book(tenant, room_id).await;
    }

    #[tokio::test]
    async fn stranger_cannot_cancel() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let contract = fx.book(TenantId::new(), room_id).await;

        let err = fx
            .contracts
            .cancel(contract.id, UserId::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn closed_contract_cannot_be_approved() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let contract = fx.book(TenantId::new(), room_id).await;
        fx.contracts
            .reject(contract.id, fx.owner.into())
            .await
            .unwrap();

        let err = fx
            .contracts
            .approve(contract.id, fx.owner.into())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::InvalidTransition { ref state, .. } if state == "rejected"
        ));
        assert_eq!(fx.counters().await, counters(1, 1));
    }

    #[tokio::test]
    async fn occupied_room_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let room_id = fx.add_room(1).await;
        let contract = fx.book(TenantId::new(), room_id).await;
        fx.contracts
            .approve(contract.id, fx.owner.into())
            .await
            .unwrap();

        let err = fx
            .rooms
            .remove_room(fx.owner.into(), room_id)
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert_eq!(fx.counters().await, counters(1, 0));
    }

    #[tokio::test]
    async fn availability_matches_rooms_after_concurrent_operations() {
        let fx = Fixture::new().await;
        let mut rooms = Vec::new();
        for _ in 0..6 {
            rooms.push(fx.add_room(1).await);
        }
        let mut contracts = Vec::new();
        for room_id in &rooms[..4] {
            contracts.push(fx.book(TenantId::new(), *room_id).await);
        }

        let approvals = contracts
            .iter()
            .map(|c| fx.contracts.approve(c.id, fx.owner.into()));
        let deletions = rooms[4..]
            .iter()
            .map(|r| fx.rooms.remove_room(fx.owner.into(), *r));
        let (approved, deleted) = tokio::join!(join_all(approvals), join_all(deletions));
        assert!(approved.iter().all(Result::is_ok));
        assert!(deleted.iter().all(Result::is_ok));

        let rejections = contracts[..2]
            .iter()
            .map(|c| fx.contracts.reject(c.id, fx.owner.into()));
        assert!(join_all(rejections).await.iter().all(Result::is_ok));

        let listed = fx.rooms.list_rooms(fx.hostel_id).await.unwrap();
        let available = listed.iter().filter(|r| r.is_available).count() as u32;
        assert_eq!(fx.counters().await, counters(4, available));
        assert_eq!(available, 2);
    }
}
