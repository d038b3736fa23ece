//! Feedback endpoint.

use axum::Json;
use axum::extract::State;
use common::TargetKind;
use domain::FeedbackReceipt;
use payments::PaymentGateway;
use serde::Deserialize;
use store::{FeedbackTarget, Store};
use uuid::Uuid;

use super::parse_id;
use crate::SharedState;
use crate::error::ApiError;
use crate::extract::Actor;

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub target_type: TargetKind,
    pub target_id: String,
    pub rating: f64,
    #[serde(default)]
    pub comment: String,
}

/// PUT /feedback: creates or replaces the acting user's feedback on a target.
#[tracing::instrument(skip(state, req), fields(target_type = %req.target_type))]
pub async fn upsert<S: Store + 'static, G: PaymentGateway + 'static>(
    State(state): State<SharedState<S, G>>,
    Actor(actor): Actor,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackReceipt>, ApiError> {
    if !req.rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&req.rating) {
        return Err(ApiError::BadRequest(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }
    let target_id: Uuid = parse_id(&req.target_id)?;
    let target = FeedbackTarget::new(req.target_type, target_id);

    let receipt = state
        .feedback
        .upsert(actor, target, req.rating, req.comment)
        .await?;
    Ok(Json(receipt))
}
