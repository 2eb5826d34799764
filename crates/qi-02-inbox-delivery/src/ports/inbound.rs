//! # Inbound Ports
//!
//! The delivery strategy capability shared by the stream and polling
//! implementations.

use crate::application::wait;
use crate::domain::{DeliveryError, Email, Inbox, WaitSpec};
use crate::registry::SubscriptionHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Error returned by a subscriber callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked once per delivered email.
pub type EmailCallback = Arc<dyn Fn(&Email) -> Result<(), CallbackError> + Send + Sync>;

/// Delivery strategy - inbound port.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    /// Register `callback` for new emails in `inbox`.
    ///
    /// The subscription lives until the handle is unsubscribed or dropped.
    fn subscribe(
        &self,
        inbox: Arc<Inbox>,
        callback: EmailCallback,
    ) -> Result<SubscriptionHandle, DeliveryError>;

    /// Wait for the first email matching `spec`.
    async fn wait_for_email(
        &self,
        inbox: Arc<Inbox>,
        spec: WaitSpec,
    ) -> Result<Email, DeliveryError> {
        wait::wait_for_one(self, inbox, spec).await
    }

    /// Fatal asynchronous failures (`StreamExhausted`, `Closed`).
    fn errors(&self) -> broadcast::Receiver<DeliveryError>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;

    /// Stop delivery, reject pending waits with `Closed`, drop all
    /// subscriptions.
    async fn close(&self);
}

/// Wrap a closure as an `EmailCallback`.
pub fn email_callback<F>(f: F) -> EmailCallback
where
    F: Fn(&Email) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(f)
}
