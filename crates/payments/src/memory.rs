use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::{OrderRequest, PaymentGateway, ProviderOrder};
use crate::signature::{PaymentConfirmation, SignatureLayout, SignatureVerifier, sign};

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    orders: HashMap<String, ProviderOrder>,
    next_id: u32,
    next_payment: u32,
    fail_on_create: bool,
    timeout_on_create: bool,
}

/// In-memory payment gateway for tests and local runs.
///
/// Order ids are sequential (`order_0000000001`, ...). Confirmations are
/// checked with the same verifier the HTTP gateway uses.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
    config: GatewayConfig,
    verifier: SignatureVerifier,
}

impl InMemoryPaymentGateway {
    /// Creates a gateway that signs and verifies with `secret`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_config(GatewayConfig::with_secret(secret))
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            state: Arc::default(),
            verifier: SignatureVerifier::from_config(&config),
            config,
        }
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to reject order creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state().fail_on_create = fail;
    }

    /// Configures the gateway to time out on order creation.
    pub fn set_timeout_on_create(&self, timeout: bool) {
        self.state().timeout_on_create = timeout;
    }

    /// Returns the number of orders created.
    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    /// Simulates the client paying `order_id`: returns a correctly signed
    /// confirmation with a fresh payment id.
    pub fn pay(&self, order_id: &str, layout: SignatureLayout) -> Result<PaymentConfirmation> {
        let secret = self
            .config
            .key_secret
            .as_deref()
            .ok_or(GatewayError::NotConfigured)?;
        let payment_id = {
            let mut state = self.state();
            state.next_payment += 1;
            format!("pay_{:010}", state.next_payment)
        };
        Ok(PaymentConfirmation {
            provider_order_id: order_id.to_string(),
            signature: sign(secret, layout, order_id, &payment_id)?,
            provider_payment_id: payment_id,
        })
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_order(&self, request: OrderRequest) -> Result<ProviderOrder> {
        let amount = self.config.payable_amount(request.amount);
        let mut state = self.state();

        if state.timeout_on_create {
            return Err(GatewayError::Timeout(self.config.timeout));
        }
        if state.fail_on_create {
            return Err(GatewayError::Provider {
                status: 502,
                message: "order creation declined".to_string(),
            });
        }

        state.next_id += 1;
        let order = ProviderOrder {
            id: format!("order_{:010}", state.next_id),
            amount,
            currency: request.currency.unwrap_or_else(|| self.config.currency.clone()),
            receipt: request.receipt,
        };
        state.orders.insert(order.id.clone(), order.clone());

        Ok(order)
    }

    async fn verify_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
        layout: SignatureLayout,
    ) -> Result<bool> {
        self.verifier.verify(confirmation, layout)
    }
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;

    #[tokio::test]
    async fn test_create_and_pay() {
        let gateway = InMemoryPaymentGateway::new("test_secret");

        let order = gateway
            .create_order(OrderRequest::new(Money::from_major(1500), "rcpt_1"))
            .await
            .unwrap();
        assert_eq!(order.id, "order_0000000001");
        assert_eq!(order.currency, "INR");
        assert_eq!(gateway.order_count(), 1);

        let confirmation = gateway
            .pay(&order.id, SignatureLayout::PaymentThenOrder)
            .unwrap();
        assert!(
            gateway
                .verify_confirmation(&confirmation, SignatureLayout::PaymentThenOrder)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let gateway = InMemoryPaymentGateway::new("test_secret");
        gateway.set_fail_on_create(true);

        let result = gateway
            .create_order(OrderRequest::new(Money::from_major(1500), "rcpt_1"))
            .await;
        assert!(matches!(result, Err(GatewayError::Provider { .. })));
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_on_create() {
        let gateway = InMemoryPaymentGateway::new("test_secret");
        gateway.set_timeout_on_create(true);

        let result = gateway
            .create_order(OrderRequest::new(Money::from_major(1500), "rcpt_1"))
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_sandbox_cap_applies_to_orders() {
        let gateway = InMemoryPaymentGateway::with_config(GatewayConfig {
            sandbox_amount_cap: Some(Money::from_major(1)),
            ..GatewayConfig::with_secret("test_secret")
        });

        let order = gateway
            .create_order(OrderRequest::new(Money::from_major(1500), "rcpt_1"))
            .await
            .unwrap();
        assert_eq!(order.amount, Money::from_major(1));
    }
}
