//! Payment provider adapter.
//!
//! Creates provider-side orders and verifies the HMAC-SHA256 signature a
//! client submits after paying. Verification is a pure function of the
//! configured secret and the confirmation; order creation is the only call
//! that leaves the process.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod signature;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::{OrderRequest, PaymentGateway, ProviderOrder};
pub use http::HttpPaymentGateway;
pub use memory::InMemoryPaymentGateway;
pub use signature::{PaymentConfirmation, SANDBOX_ORDER_PREFIX, SignatureLayout, SignatureVerifier, sign};
