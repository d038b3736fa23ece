//! Hostel and room endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{HostelId, Money, RoomId};
use domain::{DomainError, HostelReconciliation, NewRoom};
use payments::PaymentGateway;
use serde::Deserialize;
use store::{Hostel, Room, Store};

use super::parse_id;
use crate::SharedState;
use crate::error::ApiError;
use crate::extract::Actor;

#[derive(Deserialize)]
pub struct CreateHostelRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateRoomRequest {
    pub label: String,
    pub capacity: u32,
    /// Monthly rent in minor units.
    pub rent: i64,
    /// Security deposit in minor units.
    pub security_deposit: i64,
}

/// POST /hostels: the acting user becomes the owner.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Json(req): Json<CreateHostelRequest>,
) -> Result<(StatusCode, Json<Hostel>), ApiError> {
    let hostel = state.rooms.register_hostel(actor.into(), req.name).await?;
    Ok((StatusCode::CREATED, Json(hostel)))
}

/// GET /hostels/{id}: hostel with its counters and rating.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Path(id): Path<String>,
) -> Result<Json<Hostel>, ApiError> {
    let hostel_id: HostelId = parse_id(&id)?;
    Ok(Json(state.rooms.get_hostel(hostel_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn list_rooms<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Room>>, ApiError> {
    let hostel_id: HostelId = parse_id(&id)?;
    Ok(Json(state.rooms.list_rooms(hostel_id).await?))
}

/// POST /hostels/{id}/rooms
#[tracing::instrument(skip(state, req))]
pub async fn add_room<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let hostel_id: HostelId = parse_id(&id)?;
    let room = NewRoom {
        label: req.label,
        capacity: req.capacity,
        rent: Money::from_minor(req.rent),
        security_deposit: Money::from_minor(req.security_deposit),
    };
    let room = state.rooms.add_room(actor, hostel_id, room).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// DELETE /rooms/{id}
#[tracing::instrument(skip(state))]
pub async fn remove_room<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Room>, ApiError> {
    let room_id: RoomId = parse_id(&id)?;
    Ok(Json(state.rooms.remove_room(actor, room_id).await?))
}

/// POST /hostels/{id}/reconcile: recomputes the counters from the rooms.
#[tracing::instrument(skip(state))]
pub async fn reconcile<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<HostelReconciliation>, ApiError> {
    let hostel_id: HostelId = parse_id(&id)?;
    let hostel = state.rooms.get_hostel(hostel_id).await?;
    if !hostel.owner_id.is(actor) {
        return Err(DomainError::Unauthorized("reconcile this hostel").into());
    }
    Ok(Json(state.ledger.reconcile_hostel(hostel_id).await?))
}
