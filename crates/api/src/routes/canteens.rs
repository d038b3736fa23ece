//! Canteen endpoints.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CanteenId, MealPlan, Money};
use domain::{CanteenReconciliation, DomainError};
use payments::PaymentGateway;
use serde::Deserialize;
use store::{Canteen, Store};

use super::parse_id;
use crate::SharedState;
use crate::error::ApiError;
use crate::extract::Actor;

#[derive(Deserialize)]
pub struct CreateCanteenRequest {
    pub name: String,
    /// Monthly price in minor units for every enabled plan.
    pub plans: BTreeMap<MealPlan, Money>,
}

/// POST /canteens: the acting user becomes the owner.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Json(req): Json<CreateCanteenRequest>,
) -> Result<(StatusCode, Json<Canteen>), ApiError> {
    let canteen = state
        .subscriptions
        .register_canteen(actor.into(), req.name, req.plans)
        .await?;
    Ok((StatusCode::CREATED, Json(canteen)))
}

#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Path(id): Path<String>,
) -> Result<Json<Canteen>, ApiError> {
    let canteen_id: CanteenId = parse_id(&id)?;
    Ok(Json(state.subscriptions.get_canteen(canteen_id).await?))
}

/// POST /canteens/{id}/reconcile: recounts active subscriptions.
#[tracing::instrument(skip(state))]
pub async fn reconcile<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<CanteenReconciliation>, ApiError> {
    let canteen_id: CanteenId = parse_id(&id)?;
    let canteen = state.subscriptions.get_canteen(canteen_id).await?;
    if !canteen.owner_id.is(actor) {
        return Err(DomainError::Unauthorized("reconcile this canteen").into());
    }
    Ok(Json(state.ledger.reconcile_canteen(canteen_id).await?))
}
