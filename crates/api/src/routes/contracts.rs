//! Contract endpoints.

use axum::Json;
use axum::extract::{Path, State};
use common::ContractId;
use domain::DomainError;
use payments::PaymentGateway;
use store::{Contract, Store};

use super::parse_id;
use crate::SharedState;
use crate::error::ApiError;
use crate::extract::Actor;

/// GET /contracts: the acting tenant's contracts, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list_mine<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
) -> Result<Json<Vec<Contract>>, ApiError> {
    Ok(Json(state.contracts.contracts_for_tenant(actor.into()).await?))
}

/// GET /contracts/{id}: visible to the tenant and the owner.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Contract>, ApiError> {
    let contract_id: ContractId = parse_id(&id)?;
    let contract = state.contracts.get_contract(contract_id).await?;
    if !contract.tenant_id.is(actor) && !contract.owner_id.is(actor) {
        return Err(DomainError::Unauthorized("view this contract").into());
    }
    Ok(Json(contract))
}

#[tracing::instrument(skip(state))]
pub async fn approve<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Contract>, ApiError> {
    let contract_id: ContractId = parse_id(&id)?;
    Ok(Json(state.contracts.approve(contract_id, actor).await?))
}

#[tracing::instrument(skip(state))]
pub async fn reject<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Contract>, ApiError> {
    let contract_id: ContractId = parse_id(&id)?;
    Ok(Json(state.contracts.reject(contract_id, actor).await?))
}

#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Contract>, ApiError> {
    let contract_id: ContractId = parse_id(&id)?;
    Ok(Json(state.contracts.cancel(contract_id, actor).await?))
}
