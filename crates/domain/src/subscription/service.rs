use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Months, NaiveDate};
use common::{
    CanteenId, MealPlan, Money, OwnerId, PaymentStatus, SubscriptionId, SubscriptionStatus,
    TenantId, UserId,
};
use payments::{OrderRequest, PaymentConfirmation, PaymentGateway, ProviderOrder, SignatureLayout};
use serde::{Deserialize, Serialize};
use store::{Canteen, Store, StoreExt, Subscription};

use super::MAX_DURATION_MONTHS;
use crate::error::{DomainError, Result};
use crate::ledger;
use crate::notify::{Notification, Notifier, dispatch};

/// A pending subscription and the provider order that pays for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOrder {
    pub subscription: Subscription,
    pub provider_order: ProviderOrder,
}

/// Outcome of an expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub expired: Vec<SubscriptionId>,
    /// How many of the expired subscriptions were counted as subscribers.
    pub were_active: u32,
}

fn period(start: NaiveDate, months: u32) -> Result<NaiveDate> {
    start
        .checked_add_months(Months::new(months))
        .ok_or_else(|| DomainError::Validation("subscription dates out of range".to_string()))
}

/// Service for canteens and their meal subscriptions.
pub struct SubscriptionService<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    store: S,
    gateway: G,
    notifier: Arc<dyn Notifier>,
}

impl<S, G> SubscriptionService<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Registers a canteen with its enabled plans and monthly prices.
    #[tracing::instrument(skip(self, name, plans))]
    pub async fn register_canteen(
        &self,
        owner_id: OwnerId,
        name: String,
        plans: BTreeMap<MealPlan, Money>,
    ) -> Result<Canteen> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation("canteen name is required".to_string()));
        }
        if let Some((plan, _)) = plans.iter().find(|(_, price)| !price.is_positive()) {
            return Err(DomainError::Validation(format!(
                "price of the {plan} plan must be positive"
            )));
        }

        let canteen = Canteen {
            plans,
            ..Canteen::new(owner_id, name)
        };
        let mut tx = self.store.begin().await?;
        tx.insert_canteen(&canteen).await?;
        tx.commit().await?;

        tracing::info!(canteen_id = %canteen.id, "canteen registered");
        Ok(canteen)
    }

    pub async fn get_canteen(&self, canteen_id: CanteenId) -> Result<Canteen> {
        self.store
            .canteen(canteen_id)
            .await?
            .ok_or_else(|| DomainError::not_found("canteen", canteen_id))
    }

    pub async fn get_subscription(&self, subscription_id: SubscriptionId) -> Result<Subscription> {
        self.store
            .subscription(subscription_id)
            .await?
            .ok_or_else(|| DomainError::not_found("subscription", subscription_id))
    }

    /// Requests a provider order for a plan and records the subscription as
    /// pending.
    #[tracing::instrument(skip(self))]
    pub async fn create_subscription_order(
        &self,
        tenant_id: TenantId,
        canteen_id: CanteenId,
        plan: MealPlan,
        duration_months: u32,
    ) -> Result<SubscriptionOrder> {
        if duration_months == 0 || duration_months > MAX_DURATION_MONTHS {
            return Err(DomainError::Validation(format!(
                "subscription duration must be between 1 and {MAX_DURATION_MONTHS} months"
            )));
        }

        let (monthly_price, price) = {
            let mut tx = self.store.begin().await?;
            let canteen = tx
                .get_canteen(canteen_id)
                .await?
                .ok_or_else(|| DomainError::not_found("canteen", canteen_id))?;
            let monthly_price = *canteen
                .plans
                .get(&plan)
                .ok_or(DomainError::PlanNotOffered { canteen_id, plan })?;
            if tx
                .find_live_subscription(tenant_id, canteen_id)
                .await?
                .is_some()
            {
                return Err(DomainError::DuplicateActiveSubscription {
                    tenant_id,
                    canteen_id,
                });
            }
            let price = monthly_price
                .checked_mul(duration_months)
                .ok_or_else(|| DomainError::Validation("subscription price overflows".to_string()))?;
            (monthly_price, price)
        };

        let request = OrderRequest::new(price, format!("subscription_{}", canteen_id.as_uuid().simple()))
            .with_note("tenant_id", tenant_id)
            .with_note("canteen_id", canteen_id)
            .with_note("plan", plan);
        let provider_order = self.gateway.create_order(request).await?;

        let now = crate::now();
        let start_date = now.date_naive();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            tenant_id,
            canteen_id,
            plan,
            duration_months,
            monthly_price,
            price,
            start_date,
            end_date: period(start_date, duration_months)?,
            status: SubscriptionStatus::Pending,
            payment_status: PaymentStatus::Pending,
            provider_order_id: provider_order.id.clone(),
            provider_payment_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_subscription(&subscription).await?;
        tx.commit().await?;

        tracing::info!(
            subscription_id = %subscription.id,
            order_id = %provider_order.id,
            %price,
            "subscription order created"
        );
        Ok(SubscriptionOrder {
            subscription,
            provider_order,
        })
    }

    /// Activates a subscription once its payment is verified.
    ///
    /// Verifying an already-paid subscription with the same payment id
    /// returns it unchanged.
    #[tracing::instrument(
        skip(self, confirmation),
        fields(order_id = %confirmation.provider_order_id)
    )]
    pub async fn verify_subscription_payment(
        &self,
        subscription_id: SubscriptionId,
        confirmation: PaymentConfirmation,
        actor: UserId,
    ) -> Result<Subscription> {
        let current = self.get_subscription(subscription_id).await?;
        if !current.tenant_id.is(actor) {
            return Err(DomainError::Unauthorized("verify this subscription"));
        }
        if current.provider_order_id != confirmation.provider_order_id {
            return Err(DomainError::Validation(
                "order id does not match the subscription".to_string(),
            ));
        }
        if let Some(done) = already_paid(&current, &confirmation)? {
            return Ok(done);
        }

        let verified = self
            .gateway
            .verify_confirmation(&confirmation, SignatureLayout::OrderThenPayment)
            .await?;
        if !verified {
            tracing::warn!("subscription payment signature rejected");
            return Err(DomainError::InvalidSignature);
        }

        let mut tx = self.store.begin().await?;
        let mut subscription = tx
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| DomainError::not_found("subscription", subscription_id))?;
        if let Some(done) = already_paid(&subscription, &confirmation)? {
            return Ok(done);
        }
        if subscription.status != SubscriptionStatus::Pending
            || subscription.payment_status != PaymentStatus::Pending
        {
            return Err(DomainError::invalid_transition(
                "subscription",
                subscription.status,
                "activate",
            ));
        }

        let now = crate::now();
        subscription.start_date = now.date_naive();
        subscription.end_date = period(subscription.start_date, subscription.duration_months)?;
        subscription.status = SubscriptionStatus::Active;
        subscription.payment_status = PaymentStatus::Paid;
        subscription.provider_payment_id = Some(confirmation.provider_payment_id);
        subscription.updated_at = now;
        tx.update_subscription(&subscription).await?;
        let subscribers = ledger::subscriber_joined(&mut *tx, subscription.canteen_id).await?;
        tx.commit().await?;

        metrics::counter!("subscriptions_activated_total").increment(1);
        tracing::info!(subscribers, "subscription activated");
        dispatch(
            &self.notifier,
            Notification::SubscriptionActivated {
                tenant_id: subscription.tenant_id,
                subscription_id: subscription.id,
            },
        );

        Ok(subscription)
    }

    /// Records that the provider reported the payment as failed.
    #[tracing::instrument(skip(self))]
    pub async fn mark_payment_failed(
        &self,
        subscription_id: SubscriptionId,
        reason: String,
    ) -> Result<Subscription> {
        let mut tx = self.store.begin().await?;
        let mut subscription = tx
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| DomainError::not_found("subscription", subscription_id))?;
        if subscription.payment_status != PaymentStatus::Pending {
            return Err(DomainError::invalid_transition(
                "subscription payment",
                subscription.payment_status,
                "fail",
            ));
        }

        subscription.payment_status = PaymentStatus::Failed;
        subscription.failure_reason = Some(reason);
        subscription.updated_at = crate::now();
        tx.update_subscription(&subscription).await?;
        tx.commit().await?;

        metrics::counter!("subscription_payments_failed_total").increment(1);
        Ok(subscription)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, subscription_id: SubscriptionId, actor: UserId) -> Result<Subscription> {
        self.change_status(subscription_id, actor, "cancel", |status| match status {
            SubscriptionStatus::Pending
            | SubscriptionStatus::Active
            | SubscriptionStatus::Paused => Some(SubscriptionStatus::Cancelled),
            _ => None,
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn pause(&self, subscription_id: SubscriptionId, actor: UserId) -> Result<Subscription> {
        self.change_status(subscription_id, actor, "pause", |status| match status {
            SubscriptionStatus::Active => Some(SubscriptionStatus::Paused),
            _ => None,
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, subscription_id: SubscriptionId, actor: UserId) -> Result<Subscription> {
        self.change_status(subscription_id, actor, "resume", |status| match status {
            SubscriptionStatus::Paused => Some(SubscriptionStatus::Active),
            _ => None,
        })
        .await
    }

    /// Tenant-driven status change with the matching subscriber count move.
    async fn change_status(
        &self,
        subscription_id: SubscriptionId,
        actor: UserId,
        action: &'static str,
        next: impl FnOnce(SubscriptionStatus) -> Option<SubscriptionStatus> + Send,
    ) -> Result<Subscription> {
        let mut tx = self.store.begin().await?;
        let mut subscription = tx
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| DomainError::not_found("subscription", subscription_id))?;
        if !subscription.tenant_id.is(actor) {
            return Err(DomainError::Unauthorized(match action {
                "pause" => "pause this subscription",
                "resume" => "resume this subscription",
                _ => "cancel this subscription",
            }));
        }

        let from = subscription.status;
        let to = next(from)
            .ok_or_else(|| DomainError::invalid_transition("subscription", from, action))?;

        match (from.counts_as_subscriber(), to.counts_as_subscriber()) {
            (true, false) => {
                ledger::subscriber_left(&mut *tx, subscription.canteen_id).await?;
            }
            (false, true) => {
                ledger::subscriber_joined(&mut *tx, subscription.canteen_id).await?;
            }
            _ => {}
        }

        subscription.status = to;
        subscription.updated_at = crate::now();
        tx.update_subscription(&subscription).await?;
        tx.commit().await?;

        tracing::info!(%from, %to, "subscription status changed");
        Ok(subscription)
    }

    /// Expires every active or paused subscription whose end date is before `today`.
    #[tracing::instrument(skip(self))]
    pub async fn expire_due(&self, today: NaiveDate) -> Result<ExpiryReport> {
        let mut tx = self.store.begin().await?;
        let due = tx.list_live_subscriptions_ending_before(today).await?;

        let mut report = ExpiryReport::default();
        let now = crate::now();
        for mut subscription in due {
            if subscription.status.counts_as_subscriber() {
                ledger::subscriber_left(&mut *tx, subscription.canteen_id).await?;
                report.were_active += 1;
            }
            subscription.status = SubscriptionStatus::Expired;
            subscription.updated_at = now;
            tx.update_subscription(&subscription).await?;
            report.expired.push(subscription.id);
        }
        tx.commit().await?;

        if !report.expired.is_empty() {
            tracing::info!(expired = report.expired.len(), "subscriptions expired");
            metrics::counter!("subscriptions_expired_total")
                .increment(report.expired.len() as u64);
        }
        Ok(report)
    }
}

/// Returns the subscription if this exact payment already activated it.
fn already_paid(
    subscription: &Subscription,
    confirmation: &PaymentConfirmation,
) -> Result<Option<Subscription>> {
    if subscription.payment_status != PaymentStatus::Paid {
        return Ok(None);
    }
    if subscription.provider_payment_id.as_deref() == Some(confirmation.provider_payment_id.as_str()) {
        tracing::info!("subscription payment already verified");
        return Ok(Some(subscription.clone()));
    }
    Err(DomainError::invalid_transition(
        "subscription",
        "paid",
        "verify another payment for",
    ))
}
