//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorCategory};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    /// Missing or unreadable acting user.
    Unauthenticated(String),
    /// Domain logic error.
    Domain(DomainError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::Domain(err) => {
                let category = err.category();
                (status_for(category), category.as_str())
            }
        }
    }
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::PaymentVerificationFailed => StatusCode::PAYMENT_REQUIRED,
        ErrorCategory::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::PaymentOutcomeUnknown => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::InvariantViolation | ErrorCategory::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::Unauthenticated(msg) => msg,
            ApiError::Domain(err) if status.is_server_error() => {
                tracing::error!(error = %err, code, "request failed");
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    "internal error".to_string()
                } else {
                    err.to_string()
                }
            }
            ApiError::Domain(err) => err.to_string(),
        };

        metrics::counter!("api_errors_total", "code" => code).increment(1);
        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{RoomId, TenantId};

    use super::*;

    #[test]
    fn categories_map_to_statuses() {
        let cases = [
            (
                DomainError::RoomUnavailable(RoomId::new()),
                StatusCode::CONFLICT,
            ),
            (DomainError::InvalidSignature, StatusCode::PAYMENT_REQUIRED),
            (
                DomainError::PaymentOutcomeUnknown("timed out".to_string()),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                DomainError::Unauthorized("approve this contract"),
                StatusCode::FORBIDDEN,
            ),
            (
                DomainError::DuplicateActiveBooking(TenantId::new()),
                StatusCode::CONFLICT,
            ),
            (
                DomainError::InvariantViolation("counters drifted".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
