//! Confirmation signature checks.
//!
//! A provider confirmation carries `hex(HMAC-SHA256(key_secret, payload))`.
//! The payload joins the order and payment ids with `|`, in an order that
//! depends on the flow that issued the order.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Order ids with this prefix skip verification when sandbox orders are allowed.
pub const SANDBOX_ORDER_PREFIX: &str = "order_sandbox_";

/// Field order of the signed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureLayout {
    /// `payment_id|order_id`, used for room bookings.
    PaymentThenOrder,
    /// `order_id|payment_id`, used for meal subscriptions.
    OrderThenPayment,
}

impl SignatureLayout {
    fn payload(self, order_id: &str, payment_id: &str) -> String {
        match self {
            SignatureLayout::PaymentThenOrder => format!("{payment_id}|{order_id}"),
            SignatureLayout::OrderThenPayment => format!("{order_id}|{payment_id}"),
        }
    }
}

/// What the client hands back after paying a provider order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

/// Verifies confirmation signatures against the configured key secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    mac: Option<HmacSha256>,
    allow_sandbox_orders: bool,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("configured", &self.mac.is_some())
            .field("allow_sandbox_orders", &self.allow_sandbox_orders)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: Option<&str>, allow_sandbox_orders: bool) -> Self {
        Self {
            mac: secret.and_then(keyed),
            allow_sandbox_orders,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.key_secret.as_deref(), config.allow_sandbox_orders)
    }

    /// Checks a confirmation.
    ///
    /// Returns `Ok(false)` for a mismatched or malformed signature and
    /// [`GatewayError::NotConfigured`] when no secret is set.
    pub fn verify(
        &self,
        confirmation: &PaymentConfirmation,
        layout: SignatureLayout,
    ) -> Result<bool> {
        if self.allow_sandbox_orders
            && confirmation
                .provider_order_id
                .starts_with(SANDBOX_ORDER_PREFIX)
        {
            tracing::warn!(
                order_id = %confirmation.provider_order_id,
                "accepting sandbox order without signature verification"
            );
            record_outcome("sandbox");
            return Ok(true);
        }

        let Some(mac) = self.mac.clone() else {
            record_outcome("not_configured");
            return Err(GatewayError::NotConfigured);
        };

        let valid = signature_matches(
            mac,
            &layout.payload(
                &confirmation.provider_order_id,
                &confirmation.provider_payment_id,
            ),
            &confirmation.signature,
        );
        record_outcome(if valid { "valid" } else { "invalid" });
        Ok(valid)
    }
}

fn keyed(secret: &str) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

fn signature_matches(mut mac: HmacSha256, payload: &str, signature: &str) -> bool {
    mac.update(payload.as_bytes());
    // The provider sends lowercase hex; compare the text, not the decoded bytes
    let expected = hex::encode(mac.finalize().into_bytes());
    if signature.len() != expected.len() {
        return false;
    }
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("payment_verifications_total", "outcome" => outcome).increment(1);
}

/// Produces the signature the provider would attach to a confirmation.
pub fn sign(
    secret: &str,
    layout: SignatureLayout,
    order_id: &str,
    payment_id: &str,
) -> Result<String> {
    let mut mac = keyed(secret).ok_or(GatewayError::NotConfigured)?;
    mac.update(layout.payload(order_id, payment_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
