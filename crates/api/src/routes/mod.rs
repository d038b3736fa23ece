//! Route handlers, one module per resource.

pub mod bookings;
pub mod canteens;
pub mod contracts;
pub mod feedback;
pub mod health;
pub mod hostels;
pub mod metrics;
pub mod subscriptions;

use uuid::Uuid;

use crate::error::ApiError;

/// Parses a path or body identifier into a typed id.
pub(crate) fn parse_id<T: From<Uuid>>(id: &str) -> Result<T, ApiError> {
    Uuid::parse_str(id)
        .map(T::from)
        .map_err(|e| ApiError::BadRequest(format!("invalid id {id:?}: {e}")))
}
