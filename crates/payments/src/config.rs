use std::time::Duration;

use common::Money;

/// Payment provider settings.
///
/// Reads from environment variables:
/// - `PAYMENT_API_BASE`: provider REST base URL (default: `"http://localhost:8081"`)
/// - `PAYMENT_KEY_ID`: API key id, used for basic auth
/// - `PAYMENT_KEY_SECRET`: API key secret, also the HMAC key for confirmations
/// - `PAYMENT_CURRENCY`: ISO currency code (default: `"INR"`)
/// - `PAYMENT_TIMEOUT_SECS`: provider call timeout (default: `10`)
/// - `PAYMENT_ALLOW_SANDBOX_ORDERS`: accept `order_sandbox_` ids unsigned (default: `false`)
/// - `PAYMENT_SANDBOX_AMOUNT_CAP`: cap, in minor units, on amounts sent to the provider
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub currency: String,
    pub timeout: Duration,
    pub allow_sandbox_orders: bool,
    pub sandbox_amount_cap: Option<Money>,
}

impl GatewayConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: std::env::var("PAYMENT_API_BASE").unwrap_or(defaults.api_base),
            key_id: non_empty_var("PAYMENT_KEY_ID"),
            key_secret: non_empty_var("PAYMENT_KEY_SECRET"),
            currency: std::env::var("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            timeout: std::env::var("PAYMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            allow_sandbox_orders: std::env::var("PAYMENT_ALLOW_SANDBOX_ORDERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            sandbox_amount_cap: std::env::var("PAYMENT_SANDBOX_AMOUNT_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Money::from_minor),
        }
    }

    /// Configuration with a key secret and nothing else, for tests.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            key_id: Some("key_test".to_string()),
            key_secret: Some(secret.into()),
            ..Self::default()
        }
    }

    /// Applies the sandbox amount cap, if any.
    pub fn payable_amount(&self, amount: Money) -> Money {
        match self.sandbox_amount_cap {
            Some(cap) if amount > cap => {
                tracing::warn!(
                    requested = %amount,
                    capped = %cap,
                    "sandbox amount cap applied to provider order"
                );
                cap
            }
            _ => amount,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8081".to_string(),
            key_id: None,
            key_secret: None,
            currency: "INR".to_string(),
            timeout: Duration::from_secs(10),
            allow_sandbox_orders: false,
            sandbox_amount_cap: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
