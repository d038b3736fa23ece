//! Meal subscription endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, Utc};
use common::{CanteenId, MealPlan, SubscriptionId};
use domain::{DomainError, ExpiryReport, SubscriptionOrder};
use payments::{PaymentConfirmation, PaymentGateway};
use serde::Deserialize;
use store::{Store, Subscription};

use super::parse_id;
use crate::SharedState;
use crate::error::ApiError;
use crate::extract::Actor;

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub canteen_id: String,
    pub plan: MealPlan,
    pub duration_months: u32,
}

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpireQuery {
    /// Defaults to today (UTC). Dates after the server's today are clamped.
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

/// POST /subscriptions/orders
#[tracing::instrument(skip(state, req))]
pub async fn create_order<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionOrder>), ApiError> {
    let canteen_id: CanteenId = parse_id(&req.canteen_id)?;
    let order = state
        .subscriptions
        .create_subscription_order(actor.into(), canteen_id, req.plan, req.duration_months)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id: SubscriptionId = parse_id(&id)?;
    let subscription = state.subscriptions.get_subscription(subscription_id).await?;
    if !subscription.tenant_id.is(actor) {
        return Err(DomainError::Unauthorized("view this subscription").into());
    }
    Ok(Json(subscription))
}

/// POST /subscriptions/{id}/verify
#[tracing::instrument(skip(state, req), fields(order_id = %req.provider_order_id))]
pub async fn verify<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id: SubscriptionId = parse_id(&id)?;
    let confirmation = PaymentConfirmation {
        provider_order_id: req.provider_order_id,
        provider_payment_id: req.provider_payment_id,
        signature: req.signature,
    };
    let subscription = state
        .subscriptions
        .verify_subscription_payment(subscription_id, confirmation, actor)
        .await?;
    Ok(Json(subscription))
}

#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id: SubscriptionId = parse_id(&id)?;
    Ok(Json(state.subscriptions.cancel(subscription_id, actor).await?))
}

#[tracing::instrument(skip(state))]
pub async fn pause<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id: SubscriptionId = parse_id(&id)?;
    Ok(Json(state.subscriptions.pause(subscription_id, actor).await?))
}

#[tracing::instrument(skip(state))]
pub async fn resume<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription_id: SubscriptionId = parse_id(&id)?;
    Ok(Json(state.subscriptions.resume(subscription_id, actor).await?))
}

/// POST /subscriptions/expire: sweep run by the scheduler.
///
/// A caller may replay an earlier day but never sweep ahead of the server
/// clock, so only subscriptions whose end date has passed are expired.
#[tracing::instrument(skip(state))]
pub async fn expire<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Query(query): Query<ExpireQuery>,
) -> Result<Json<ExpiryReport>, ApiError> {
    let server_today = Utc::now().date_naive();
    let today = match query.today {
        Some(requested) if requested > server_today => {
            tracing::warn!(%requested, %server_today, "expiry date ahead of server clock, clamping");
            server_today
        }
        Some(requested) => requested,
        None => server_today,
    };
    Ok(Json(state.subscriptions.expire_due(today).await?))
}
