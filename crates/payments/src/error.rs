use thiserror::Error;

/// Errors from the payment provider adapter.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The adapter has no key secret configured.
    #[error("payment provider is not configured")]
    NotConfigured,

    /// The provider did not answer in time. The order may or may not exist.
    #[error("payment provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The provider answered with a failure status.
    #[error("payment provider rejected the request ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("payment provider transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
