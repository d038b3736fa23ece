//! Notification collaborator boundary.
//!
//! Notifications are dispatched after the state change they describe has
//! committed. Delivery runs on its own task; a failure is logged and never
//! affects the operation that triggered it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{ContractId, OwnerId, SubscriptionId, TenantId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A tenant paid for a room and the contract awaits the owner.
    BookingConfirmed {
        owner_id: OwnerId,
        tenant_id: TenantId,
        contract_id: ContractId,
        contract_number: String,
    },
    ContractApproved {
        tenant_id: TenantId,
        contract_id: ContractId,
    },
    ContractClosed {
        tenant_id: TenantId,
        owner_id: OwnerId,
        contract_id: ContractId,
    },
    SubscriptionActivated {
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::BookingConfirmed { .. } => "booking_confirmed",
            Notification::ContractApproved { .. } => "contract_approved",
            Notification::ContractClosed { .. } => "contract_closed",
            Notification::SubscriptionActivated { .. } => "subscription_activated",
        }
    }
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers notifications to people.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(kind = notification.kind(), ?notification, "notification");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Notifier that records what it was asked to send, for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every delivery to fail.
    pub fn set_fail(&self, fail: bool) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }

    /// Returns the notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(NotifyError("delivery disabled".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}

/// Sends a notification on a background task.
pub(crate) fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let kind = notification.kind();
        if let Err(e) = notifier.notify(notification).await {
            tracing::warn!(kind, error = %e, "notification not delivered");
            metrics::counter!("notification_failures_total", "kind" => kind).increment(1);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_notifications() {
        let notifier = InMemoryNotifier::new();
        let notification = Notification::ContractApproved {
            tenant_id: TenantId::new(),
            contract_id: ContractId::new(),
        };

        notifier.notify(notification.clone()).await.unwrap();
        assert_eq!(notifier.sent(), vec![notification]);
    }

    #[tokio::test]
    async fn test_failing_notifier() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail(true);

        let result = notifier
            .notify(Notification::ContractApproved {
                tenant_id: TenantId::new(),
                contract_id: ContractId::new(),
            })
            .await;
        assert!(result.is_err());
        assert!(notifier.sent().is_empty());
    }
}
