use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use common::{ContractId, ContractState, HostelId, Money, RoomId, TenantId, UserId};
use payments::{OrderRequest, PaymentConfirmation, PaymentGateway, ProviderOrder, SignatureLayout};
use serde::{Deserialize, Serialize};
use store::{BookingIntent, Contract, PaymentReference, Store, StoreError, StoreExt, StoreTx};

use super::terms;
use crate::error::{DomainError, Result};
use crate::ledger;
use crate::notify::{Notification, Notifier, dispatch};

/// Default time an initiation keeps the tenant's booking claim before the
/// provider order is attached.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 120;

/// A provider order issued for a room booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingOrder {
    pub tenant_id: TenantId,
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    /// Rent plus security deposit.
    pub amount: Money,
    pub provider_order: ProviderOrder,
}

/// A tenant's payment confirmation for a booking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmBooking {
    pub tenant_id: TenantId,
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    pub confirmation: PaymentConfirmation,
    pub start_date: Option<NaiveDate>,
    pub duration_months: Option<u32>,
}

/// What an owner or tenant does to an existing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Approve,
    Reject,
    Cancel,
}

impl Transition {
    fn action(self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
        }
    }
}

/// Service for room bookings and the contracts they produce.
pub struct ContractService<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    store: S,
    gateway: G,
    notifier: Arc<dyn Notifier>,
    claim_ttl: Duration,
}

impl<S, G> ContractService<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            gateway,
            notifier,
            claim_ttl: Duration::seconds(DEFAULT_CLAIM_TTL_SECS),
        }
    }

    /// Sets how long an in-flight booking initiation blocks another one.
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl;
        self
    }

    /// Requests a provider order for a room.
    ///
    /// The tenant's booking claim is taken before the provider is called and
    /// released again if the call fails, so two concurrent initiations by the
    /// same tenant cannot both reach the provider.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_booking(
        &self,
        tenant_id: TenantId,
        room_id: RoomId,
        hostel_id: HostelId,
    ) -> Result<BookingOrder> {
        let claimed_at = crate::now();

        let mut tx = self.store.begin().await?;
        let room = tx
            .get_room(room_id)
            .await?
            .filter(|room| room.hostel_id == hostel_id)
            .ok_or_else(|| DomainError::not_found("room", room_id))?;
        if !room.is_available {
            return Err(DomainError::RoomUnavailable(room_id));
        }
        if tx.find_open_contract(tenant_id).await?.is_some() {
            return Err(DomainError::DuplicateActiveBooking(tenant_id));
        }
        let amount = room
            .rent
            .checked_add(room.security_deposit)
            .ok_or_else(|| DomainError::Validation("booking amount overflows".to_string()))?;

        let intent = BookingIntent {
            tenant_id,
            room_id,
            hostel_id,
            amount,
            provider_order_id: None,
            claimed_at,
        };
        if !tx
            .claim_booking_intent(&intent, claimed_at - self.claim_ttl)
            .await?
        {
            return Err(DomainError::DuplicateActiveBooking(tenant_id));
        }
        tx.commit().await?;

        let request = OrderRequest::new(amount, format!("booking_{}", room_id.as_uuid().simple()))
            .with_note("tenant_id", tenant_id)
            .with_note("room_id", room_id)
            .with_note("hostel_id", hostel_id);
        let provider_order = match self.gateway.create_order(request).await {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(error = %e, "provider order failed, releasing booking claim");
                self.release_claim(&intent).await?;
                return Err(e.into());
            }
        };

        let mut tx = self.store.begin().await?;
        match tx.get_booking_intent(tenant_id).await? {
            Some(current) if current == intent => {}
            _ => return Err(DomainError::DuplicateActiveBooking(tenant_id)),
        }
        let intent = BookingIntent {
            provider_order_id: Some(provider_order.id.clone()),
            ..intent
        };
        tx.put_booking_intent(&intent).await?;
        tx.commit().await?;

        metrics::counter!("bookings_initiated_total").increment(1);
        tracing::info!(order_id = %provider_order.id, %amount, "booking initiated");

        Ok(BookingOrder {
            tenant_id,
            room_id,
            hostel_id,
            amount,
            provider_order,
        })
    }

    /// Deletes the claim only if it is still the one this call made.
    async fn release_claim(&self, intent: &BookingIntent) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if tx.get_booking_intent(intent.tenant_id).await?.as_ref() == Some(intent) {
            tx.delete_booking_intent(intent.tenant_id).await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Turns a verified payment into a contract awaiting the owner.
    ///
    /// Safe to retry: confirming the same provider order again returns the
    /// contract created the first time.
    #[tracing::instrument(
        skip(self, cmd),
        fields(
            tenant_id = %cmd.tenant_id,
            room_id = %cmd.room_id,
            order_id = %cmd.confirmation.provider_order_id
        )
    )]
    pub async fn confirm_booking(&self, cmd: ConfirmBooking) -> Result<Contract> {
        let verified = self
            .gateway
            .verify_confirmation(&cmd.confirmation, SignatureLayout::PaymentThenOrder)
            .await?;
        if !verified {
            tracing::warn!("booking payment signature rejected");
            return Err(DomainError::InvalidSignature);
        }

        let now = crate::now();
        let start_date = cmd.start_date.unwrap_or_else(|| now.date_naive());
        let end_date = terms::end_date(
            start_date,
            cmd.duration_months
                .unwrap_or(terms::DEFAULT_DURATION_MONTHS),
        )?;
        let order_id = cmd.confirmation.provider_order_id.as_str();

        let mut tx = self.store.begin().await?;
        if let Some(existing) = tx.find_contract_by_provider_order(order_id).await? {
            return already_confirmed(existing, cmd.tenant_id);
        }

        let intent = match tx.get_booking_intent(cmd.tenant_id).await? {
            Some(intent) if intent.provider_order_id.as_deref() == Some(order_id) => {
                if intent.room_id != cmd.room_id || intent.hostel_id != cmd.hostel_id {
                    return Err(DomainError::Validation(
                        "payment was made for a different room".to_string(),
                    ));
                }
                intent
            }
            Some(intent) => {
                // The money has been captured for an order the tenant replaced
                tracing::warn!(
                    payment_id = %cmd.confirmation.provider_payment_id,
                    current_order = intent.provider_order_id.as_deref().unwrap_or("none"),
                    "payment received for a superseded booking order, refund required"
                );
                metrics::counter!("booking_orders_superseded_total").increment(1);
                return Err(DomainError::OrderSuperseded(order_id.to_string()));
            }
            None => {
                return Err(DomainError::Validation(
                    "payment does not match a booking order for this tenant".to_string(),
                ));
            }
        };

        let room = tx
            .get_room(cmd.room_id)
            .await?
            .ok_or_else(|| DomainError::not_found("room", cmd.room_id))?;
        if !room.is_available {
            return Err(DomainError::RoomUnavailable(cmd.room_id));
        }
        if tx.find_open_contract(cmd.tenant_id).await?.is_some() {
            return Err(DomainError::DuplicateActiveBooking(cmd.tenant_id));
        }
        let hostel = tx
            .get_hostel(cmd.hostel_id)
            .await?
            .ok_or_else(|| DomainError::not_found("hostel", cmd.hostel_id))?;

        let contract = Contract {
            id: ContractId::new(),
            contract_number: terms::contract_number(now),
            tenant_id: cmd.tenant_id,
            room_id: room.id,
            hostel_id: hostel.id,
            owner_id: hostel.owner_id,
            monthly_rent: room.rent,
            security_deposit: room.security_deposit,
            start_date,
            end_date,
            state: ContractState::PendingSignatures,
            payment: PaymentReference {
                provider_order_id: order_id.to_string(),
                provider_payment_id: cmd.confirmation.provider_payment_id.clone(),
                amount: intent.amount,
            },
            terms: terms::default_terms(room.rent),
            created_at: now,
            updated_at: now,
            approved_at: None,
            closed_at: None,
        };

        match tx.insert_contract(&contract).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation { constraint }) => {
                drop(tx);
                tracing::info!(%constraint, "concurrent confirmation detected");
                return self.resolve_confirmation_race(order_id, cmd.tenant_id).await;
            }
            Err(e) => return Err(e.into()),
        }
        tx.delete_booking_intent(cmd.tenant_id).await?;
        tx.commit().await?;

        metrics::counter!("bookings_confirmed_total").increment(1);
        tracing::info!(
            contract_id = %contract.id,
            contract_number = %contract.contract_number,
            "booking confirmed"
        );
        dispatch(
            &self.notifier,
            Notification::BookingConfirmed {
                owner_id: contract.owner_id,
                tenant_id: contract.tenant_id,
                contract_id: contract.id,
                contract_number: contract.contract_number.clone(),
            },
        );

        Ok(contract)
    }

    async fn resolve_confirmation_race(&self, order_id: &str, tenant_id: TenantId) -> Result<Contract> {
        let mut tx = self.store.begin().await?;
        match tx.find_contract_by_provider_order(order_id).await? {
            Some(existing) => already_confirmed(existing, tenant_id),
            None => Err(DomainError::DuplicateActiveBooking(tenant_id)),
        }
    }

    /// Owner approval: the tenant moves into the room.
    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, contract_id: ContractId, actor: UserId) -> Result<Contract> {
        self.transition(contract_id, actor, Transition::Approve).await
    }

    /// Owner rejection of a pending contract, or termination of an active one.
    #[tracing::instrument(skip(self))]
    pub async fn reject(&self, contract_id: ContractId, actor: UserId) -> Result<Contract> {
        self.transition(contract_id, actor, Transition::Reject).await
    }

    /// Cancellation by the tenant or the owner.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, contract_id: ContractId, actor: UserId) -> Result<Contract> {
        self.transition(contract_id, actor, Transition::Cancel).await
    }

    async fn transition(
        &self,
        contract_id: ContractId,
        actor: UserId,
        transition: Transition,
    ) -> Result<Contract> {
        let mut tx = self.store.begin().await?;
        let mut contract = tx
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| DomainError::not_found("contract", contract_id))?;

        let is_owner = contract.owner_id.is(actor);
        let allowed = match transition {
            Transition::Approve | Transition::Reject => is_owner,
            Transition::Cancel => is_owner || contract.tenant_id.is(actor),
        };
        if !allowed {
            return Err(DomainError::Unauthorized(match transition {
                Transition::Approve => "approve this contract",
                Transition::Reject => "reject this contract",
                Transition::Cancel => "cancel this contract",
            }));
        }

        let from = contract.state;
        let to = next_state(from, transition)
            .ok_or_else(|| DomainError::invalid_transition("contract", from, transition.action()))?;

        apply_occupancy(&mut *tx, &contract, from, to).await?;

        let now = crate::now();
        contract.state = to;
        contract.updated_at = now;
        if to == ContractState::Active {
            contract.approved_at = Some(now);
        }
        if to.is_terminal() {
            contract.closed_at = Some(now);
        }
        tx.update_contract(&contract).await?;
        tx.commit().await?;

        metrics::counter!("contract_transitions_total", "to" => to.as_str()).increment(1);
        tracing::info!(%from, %to, "contract transitioned");

        let notification = if to == ContractState::Active {
            Notification::ContractApproved {
                tenant_id: contract.tenant_id,
                contract_id: contract.id,
            }
        } else {
            Notification::ContractClosed {
                tenant_id: contract.tenant_id,
                owner_id: contract.owner_id,
                contract_id: contract.id,
            }
        };
        dispatch(&self.notifier, notification);

        Ok(contract)
    }

    pub async fn get_contract(&self, contract_id: ContractId) -> Result<Contract> {
        self.store
            .contract(contract_id)
            .await?
            .ok_or_else(|| DomainError::not_found("contract", contract_id))
    }

    pub async fn contracts_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<Contract>> {
        Ok(self.store.contracts_for_tenant(tenant_id).await?)
    }
}

fn already_confirmed(existing: Contract, tenant_id: TenantId) -> Result<Contract> {
    if existing.tenant_id != tenant_id {
        return Err(DomainError::Unauthorized(
            "confirm a payment made by another tenant",
        ));
    }
    tracing::info!(contract_id = %existing.id, "booking already confirmed");
    Ok(existing)
}

fn next_state(from: ContractState, transition: Transition) -> Option<ContractState> {
    match (transition, from) {
        (Transition::Approve, ContractState::PendingSignatures) => Some(ContractState::Active),
        (Transition::Reject, ContractState::PendingSignatures) => Some(ContractState::Rejected),
        (Transition::Reject, ContractState::Active) => Some(ContractState::Terminated),
        (Transition::Cancel, state) if state.can_cancel() => Some(ContractState::Terminated),
        _ => None,
    }
}

/// Moves the tenant in or out of the room when occupancy changes.
async fn apply_occupancy(
    tx: &mut dyn StoreTx,
    contract: &Contract,
    from: ContractState,
    to: ContractState,
) -> Result<()> {
    match (from.occupies_room(), to.occupies_room()) {
        (false, true) => {
            ledger::occupy(tx, contract.room_id, contract.tenant_id).await?;
        }
        (true, false) => {
            ledger::release(tx, contract.room_id, contract.tenant_id).await?;
        }
        _ => {}
    }
    Ok(())
}
