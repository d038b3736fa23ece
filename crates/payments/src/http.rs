//! Provider REST client.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use common::Money;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::{OrderRequest, PaymentGateway, ProviderOrder};
use crate::signature::{PaymentConfirmation, SignatureLayout, SignatureVerifier};

/// Gateway backed by the provider's REST API.
///
/// Orders are created with `POST {api_base}/v1/orders` using basic auth
/// (key id, key secret). Each call is bounded by [`GatewayConfig::timeout`].
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    config: GatewayConfig,
    verifier: SignatureVerifier,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    receipt: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            verifier: SignatureVerifier::from_config(&config),
            config,
        }
    }

    fn orders_url(&self) -> String {
        format!("{}/v1/orders", self.config.api_base.trim_end_matches('/'))
    }

    async fn send_order(
        &self,
        key_id: &str,
        key_secret: &str,
        body: &CreateOrderBody<'_>,
    ) -> Result<OrderResponse> {
        let response = self
            .client
            .post(self.orders_url())
            .basic_auth(key_id, Some(key_secret))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            tracing::error!(status, %message, "provider rejected order creation");
            return Err(GatewayError::Provider { status, message });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(receipt = %request.receipt))]
    async fn create_order(&self, request: OrderRequest) -> Result<ProviderOrder> {
        let (Some(key_id), Some(key_secret)) = (
            self.config.key_id.as_deref(),
            self.config.key_secret.as_deref(),
        ) else {
            return Err(GatewayError::NotConfigured);
        };

        let amount = self.config.payable_amount(request.amount);
        let currency = request.currency.as_deref().unwrap_or(&self.config.currency);
        let body = CreateOrderBody {
            amount: amount.minor(),
            currency,
            receipt: &request.receipt,
            notes: &request.notes,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.timeout,
            self.send_order(key_id, key_secret, &body),
        )
        .await;
        metrics::histogram!("payment_provider_latency_seconds")
            .record(started.elapsed().as_secs_f64());

        let order = match outcome {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(timeout = ?self.config.timeout, "provider order creation timed out");
                metrics::counter!("payment_provider_timeouts_total").increment(1);
                return Err(GatewayError::Timeout(self.config.timeout));
            }
        };

        tracing::info!(order_id = %order.id, amount = order.amount, "provider order created");
        Ok(ProviderOrder {
            id: order.id,
            amount: Money::from_minor(order.amount),
            currency: order.currency,
            receipt: order.receipt.unwrap_or(request.receipt),
        })
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
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_missing_credentials() {
        let gateway = HttpPaymentGateway::new(GatewayConfig::default());
        let result = gateway
            .create_order(OrderRequest::new(Money::from_major(100), "rcpt_1"))
            .await;
        assert!(matches!(result, Err(GatewayError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_unresponsive_provider_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let gateway = HttpPaymentGateway::new(GatewayConfig {
            api_base: format!("http://{addr}"),
            timeout: Duration::from_millis(100),
            ..GatewayConfig::with_secret("test_secret")
        });

        let result = gateway
            .create_order(OrderRequest::new(Money::from_major(100), "rcpt_1"))
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[test]
    fn test_orders_url() {
        let gateway = HttpPaymentGateway::new(GatewayConfig {
            api_base: "https://provider.test/".to_string(),
            ..GatewayConfig::default()
        });
        assert_eq!(gateway.orders_url(), "https://provider.test/v1/orders");
    }
}
