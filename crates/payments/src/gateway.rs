use std::collections::BTreeMap;

use async_trait::async_trait;
use common::Money;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::signature::{PaymentConfirmation, SignatureLayout};

/// Request for a provider-side order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub amount: Money,
    /// Falls back to the gateway's configured currency.
    pub currency: Option<String>,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

impl OrderRequest {
    pub fn new(amount: Money, receipt: impl Into<String>) -> Self {
        Self {
            amount,
            currency: None,
            receipt: receipt.into(),
            notes: BTreeMap::new(),
        }
    }

    pub fn with_note(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.notes.insert(key.into(), value.to_string());
        self
    }
}

/// An order as acknowledged by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub id: String,
    /// The amount the provider will collect, after any sandbox cap.
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
}

/// Trait for payment provider operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an order the client can pay against.
    async fn create_order(&self, request: OrderRequest) -> Result<ProviderOrder>;

    /// Checks a client-submitted confirmation.
    async fn verify_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
        layout: SignatureLayout,
    ) -> Result<bool>;
}
