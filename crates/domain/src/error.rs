//! Domain error types.

use common::{CanteenId, MealPlan, RoomId, TenantId};
use payments::GatewayError;
use store::StoreError;
use thiserror::Error;

/// Broad classes of failure, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Conflict,
    Authorization,
    PaymentVerificationFailed,
    ServiceUnavailable,
    PaymentOutcomeUnknown,
    InvariantViolation,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::PaymentVerificationFailed => "payment_verification_failed",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::PaymentOutcomeUnknown => "payment_outcome_unknown",
            ErrorCategory::InvariantViolation => "invariant_violation",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Room {0} is not available")]
    RoomUnavailable(RoomId),

    #[error("Tenant {0} already has an open booking")]
    DuplicateActiveBooking(TenantId),

    #[error("Tenant {tenant_id} already subscribes to canteen {canteen_id}")]
    DuplicateActiveSubscription {
        tenant_id: TenantId,
        canteen_id: CanteenId,
    },

    #[error("Booking order {0} was replaced by a newer one")]
    OrderSuperseded(String),

    #[error("Room {room_id} is at capacity ({capacity})")]
    CapacityExceeded { room_id: RoomId, capacity: u32 },

    #[error("Canteen {canteen_id} does not offer the {plan} plan")]
    PlanNotOffered { canteen_id: CanteenId, plan: MealPlan },

    #[error("Invalid state transition: cannot {action} {entity} in {state} state")]
    InvalidTransition {
        entity: &'static str,
        state: String,
        action: &'static str,
    },

    #[error("Not allowed to {0}")]
    Unauthorized(&'static str),

    #[error("Payment signature verification failed")]
    InvalidSignature,

    /// The provider did not answer; the payment may or may not have happened.
    #[error("Payment outcome unknown: {0}")]
    PaymentOutcomeUnknown(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DomainError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_transition(
        entity: &'static str,
        state: impl ToString,
        action: &'static str,
    ) -> Self {
        DomainError::InvalidTransition {
            entity,
            state: state.to_string(),
            action,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DomainError::Validation(_) => ErrorCategory::Validation,
            DomainError::NotFound { .. } => ErrorCategory::NotFound,
            DomainError::RoomUnavailable(_)
            | DomainError::DuplicateActiveBooking(_)
            | DomainError::DuplicateActiveSubscription { .. }
            | DomainError::CapacityExceeded { .. }
            | DomainError::OrderSuperseded(_)
            | DomainError::PlanNotOffered { .. }
            | DomainError::InvalidTransition { .. } => ErrorCategory::Conflict,
            DomainError::Unauthorized(_) => ErrorCategory::Authorization,
            DomainError::InvalidSignature => ErrorCategory::PaymentVerificationFailed,
            DomainError::PaymentOutcomeUnknown(_) => ErrorCategory::PaymentOutcomeUnknown,
            DomainError::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
            DomainError::InvariantViolation(_) => ErrorCategory::InvariantViolation,
            DomainError::Store(StoreError::NotFound { .. }) => ErrorCategory::NotFound,
            DomainError::Store(StoreError::UniqueViolation { .. }) => ErrorCategory::Conflict,
            DomainError::Store(_) => ErrorCategory::Internal,
        }
    }
}

impl From<GatewayError> for DomainError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout(_) => DomainError::PaymentOutcomeUnknown(err.to_string()),
            GatewayError::NotConfigured
            | GatewayError::Provider { .. }
            | GatewayError::Transport(_) => DomainError::ServiceUnavailable(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
