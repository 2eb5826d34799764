//! # Subscription Registry
//!
//! Per-inbox ordered callback sets keyed by routing hash. Shared by both
//! delivery strategies.
//!
//! - An inbox entry is created by its first callback and removed with its last.
//! - Fan-out runs callbacks in registration order, outside the lock, each
//!   isolated from the others.
//! - Every membership change wakes the owning strategy's reconcile loop.

use crate::domain::{Email, Inbox};
use crate::ports::inbound::EmailCallback;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

/// Subscription identifier.
pub type SubscriptionId = Uuid;

struct Subscription {
    inbox: Arc<Inbox>,
    callbacks: Vec<(SubscriptionId, EmailCallback)>,
}

/// Registry of active subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
    changed: Notify,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` for `inbox`.
    pub fn add(self: &Arc<Self>, inbox: Arc<Inbox>, callback: EmailCallback) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let routing_hash = inbox.routing_hash.clone();
        {
            let mut subs = self.subscriptions.lock();
            subs.entry(routing_hash.clone())
                .or_insert_with(|| Subscription {
                    inbox,
                    callbacks: Vec::new(),
                })
                .callbacks
                .push((id, callback));
        }
        debug!(inbox = %routing_hash, subscription_id = %id, "Added subscription");
        self.changed.notify_one();

        SubscriptionHandle {
            registry: Arc::downgrade(self),
            routing_hash,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Remove one callback. Returns false if it was already gone.
    pub fn remove(&self, routing_hash: &str, id: SubscriptionId) -> bool {
        let removed = {
            let mut subs = self.subscriptions.lock();
            let Some(sub) = subs.get_mut(routing_hash) else {
                return false;
            };
            let before = sub.callbacks.len();
            sub.callbacks.retain(|(cb_id, _)| *cb_id != id);
            let removed = sub.callbacks.len() != before;
            if sub.callbacks.is_empty() {
                subs.remove(routing_hash);
            }
            removed
        };
        if removed {
            debug!(inbox = %routing_hash, subscription_id = %id, "Removed subscription");
            self.changed.notify_one();
        }
        removed
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscriptions.lock().clear();
        self.changed.notify_one();
    }

    /// Sorted routing hashes with at least one callback.
    pub fn routing_hashes(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Inbox registered under `routing_hash`.
    pub fn inbox(&self, routing_hash: &str) -> Option<Arc<Inbox>> {
        self.subscriptions
            .lock()
            .get(routing_hash)
            .map(|s| Arc::clone(&s.inbox))
    }

    /// Number of callbacks registered for `routing_hash`.
    pub fn callback_count(&self, routing_hash: &str) -> usize {
        self.subscriptions
            .lock()
            .get(routing_hash)
            .map_or(0, |s| s.callbacks.len())
    }

    /// Whether no inbox is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    /// Resolves after the next membership change.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Run every callback registered for `routing_hash` on `email`.
    ///
    /// Callbacks are looked up at call time, so removed subscriptions are
    /// never invoked. Returns the number of callbacks that succeeded.
    pub fn deliver(&self, routing_hash: &str, email: &Email) -> usize {
        let callbacks: Vec<(SubscriptionId, EmailCallback)> = match self
            .subscriptions
            .lock()
            .get(routing_hash)
        {
            Some(sub) => sub.callbacks.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(email))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    inbox = %routing_hash,
                    subscription_id = %id,
                    email_id = %email.id(),
                    error = %e,
                    "Subscriber callback failed"
                ),
                Err(_) => warn!(
                    inbox = %routing_hash,
                    subscription_id = %id,
                    email_id = %email.id(),
                    "Subscriber callback panicked"
                ),
            }
        }
        delivered
    }
}

/// Owned handle to one registered callback.
///
/// Unsubscribing is idempotent. Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    registry: Weak<SubscriptionRegistry>,
    routing_hash: String,
    id: SubscriptionId,
    active: AtomicBool,
}

impl SubscriptionHandle {
    /// Subscription identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Routing hash of the subscribed inbox.
    pub fn routing_hash(&self) -> &str {
        &self.routing_hash
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove the callback. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.routing_hash, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("routing_hash", &self.routing_hash)
            .field("active", &self.is_active())
            .finish()
    }
}
