//! Room booking endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{HostelId, RoomId};
use domain::{BookingOrder, ConfirmBooking};
use payments::{PaymentConfirmation, PaymentGateway};
use serde::Deserialize;
use store::{Contract, Store};

use super::parse_id;
use crate::SharedState;
use crate::error::ApiError;
use crate::extract::Actor;

#[derive(Deserialize)]
pub struct InitiateBookingRequest {
    pub room_id: String,
    pub hostel_id: String,
}

#[derive(Deserialize)]
pub struct ConfirmBookingRequest {
    pub room_id: String,
    pub hostel_id: String,
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration_months: Option<u32>,
}

/// POST /bookings/orders: creates a provider order for rent plus deposit.
#[tracing::instrument(skip(state, req))]
pub async fn initiate<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Json(req): Json<InitiateBookingRequest>,
) -> Result<(StatusCode, Json<BookingOrder>), ApiError> {
    let room_id: RoomId = parse_id(&req.room_id)?;
    let hostel_id: HostelId = parse_id(&req.hostel_id)?;
    let order = state
        .contracts
        .initiate_booking(actor.into(), room_id, hostel_id)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// POST /bookings/confirm: turns a paid order into a pending contract.
#[tracing::instrument(skip(state, req), fields(order_id = %req.provider_order_id))]
pub async fn confirm<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Json(req): Json<ConfirmBookingRequest>,
) -> Result<Json<Contract>, ApiError> {
    let cmd = ConfirmBooking {
        tenant_id: actor.into(),
        room_id: parse_id(&req.room_id)?,
        hostel_id: parse_id(&req.hostel_id)?,
        confirmation: PaymentConfirmation {
            provider_order_id: req.provider_order_id,
            provider_payment_id: req.provider_payment_id,
            signature: req.signature,
        },
        start_date: req.start_date,
        duration_months: req.duration_months,
    };
    Ok(Json(state.contracts.confirm_booking(cmd).await?))
}
