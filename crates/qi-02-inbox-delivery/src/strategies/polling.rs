//! # Polling Strategy
//!
//! Digest-based change detection over the gateway's sync endpoint.
//!
//! - Waits run an adaptive loop: fetch the snapshot, fetch and filter the
//!   emails only when the digest changed, otherwise back off.
//! - Subscriptions run one watcher task per inbox on a fixed interval,
//!   tracking the ids already delivered.
//! - A not-found snapshot ends the wait (or watcher) immediately.

use crate::algorithms::{deadline_after, filter, PollBackoff};
use crate::config::PollingConfig;
use crate::domain::{DeliveryError, Email, GatewayError, Inbox, WaitSpec};
use crate::ports::inbound::{DeliveryStrategy, EmailCallback};
use crate::ports::outbound::InboxGateway;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use async_trait::async_trait;
use qi_01_envelope_crypto::EnvelopeDecryptionApi;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Shared {
    config: PollingConfig,
    gateway: Arc<dyn InboxGateway>,
    crypto: Arc<dyn EnvelopeDecryptionApi>,
    registry: Arc<SubscriptionRegistry>,
    errors: broadcast::Sender<DeliveryError>,
    cancel: CancellationToken,
    closed: AtomicBool,
    /// Inboxes whose watcher stopped on not-found. Not re-watched until every
    /// subscription for them is gone.
    gone: parking_lot::Mutex<HashSet<String>>,
}

/// Polling delivery strategy.
pub struct PollingStrategy {
    shared: Arc<Shared>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PollingStrategy {
    /// Create the strategy and start its watcher supervisor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: PollingConfig,
        gateway: Arc<dyn InboxGateway>,
        crypto: Arc<dyn EnvelopeDecryptionApi>,
    ) -> Self {
        let (errors, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            config,
            gateway,
            crypto,
            registry: SubscriptionRegistry::new(),
            errors,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            gone: parking_lot::Mutex::new(HashSet::new()),
        });
        let supervisor = tokio::spawn(supervise(Arc::clone(&shared)));
        Self {
            shared,
            supervisor: parking_lot::Mutex::new(Some(supervisor)),
        }
    }

    /// The subscription registry backing this strategy.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    async fn poll_until_match(&self, inbox: &Inbox, spec: &WaitSpec) -> Result<Email, DeliveryError> {
        let shared = &self.shared;
        let mut backoff = PollBackoff::new(
            spec.poll_interval.unwrap_or_else(|| shared.config.initial_interval()),
            shared.config.backoff_multiplier,
            shared.config.max_backoff(),
            shared.config.jitter_factor,
        );
        let deadline = deadline_after(spec.timeout);
        let mut last_digest: Option<String> = None;

        loop {
            match shared.gateway.sync_status(&inbox.email_address).await {
                Ok(snapshot) if last_digest.as_deref() != Some(snapshot.emails_hash.as_str()) => {
                    debug!(
                        inbox = %inbox.routing_hash,
                        count = snapshot.email_count,
                        "Inbox digest changed"
                    );
                    last_digest = Some(snapshot.emails_hash);
                    if snapshot.email_count > 0 {
                        if let Some(email) = find_match(shared, inbox, spec).await? {
                            return Ok(email);
                        }
                    }
                    backoff.reset();
                }
                Ok(_) => backoff.grow(),
                Err(e) if e.is_permanent() => return Err(e.into()),
                Err(e) => {
                    warn!(inbox = %inbox.routing_hash, error = %e, "Sync check failed");
                    backoff.grow();
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeliveryError::timeout(spec.timeout));
            }
            tokio::time::sleep(backoff.sleep_for(rand::random::<f64>(), remaining)).await;
        }
    }
}

#[async_trait]
impl DeliveryStrategy for PollingStrategy {
    fn subscribe(
        &self,
        inbox: Arc<Inbox>,
        callback: EmailCallback,
    ) -> Result<SubscriptionHandle, DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        Ok(self.shared.registry.add(inbox, callback))
    }

    async fn wait_for_email(
        &self,
        inbox: Arc<Inbox>,
        spec: WaitSpec,
    ) -> Result<Email, DeliveryError> {
        if spec.timeout.is_zero() {
            return Err(DeliveryError::timeout(spec.timeout));
        }
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let deadline = deadline_after(spec.timeout);
        let cancel = self.shared.cancel.clone();

        tokio::select! {
            _ = cancel.cancelled() => Err(DeliveryError::Closed),
            outcome = timeout_at(deadline, self.poll_until_match(&inbox, &spec)) => {
                outcome.unwrap_or_else(|_| Err(DeliveryError::timeout(spec.timeout)))
            }
        }
    }

    fn errors(&self) -> broadcast::Receiver<DeliveryError> {
        self.shared.errors.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing polling strategy");
        self.shared.cancel.cancel();
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        self.shared.registry.clear();
        let _ = self.shared.errors.send(DeliveryError::Closed);
    }
}

impl Drop for PollingStrategy {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
    }
}

/// Decrypt the inbox's emails and return the first one matching `spec`.
///
/// Emails that fail verification or decryption are skipped.
async fn find_match(
    shared: &Shared,
    inbox: &Inbox,
    spec: &WaitSpec,
) -> Result<Option<Email>, DeliveryError> {
    let emails = shared
        .gateway
        .list_emails(&inbox.email_address)
        .await
        .map_err(DeliveryError::from)?;

    for encrypted in &emails {
        match Email::open(shared.crypto.as_ref(), inbox, encrypted) {
            Ok(email) if filter::matches(spec, &email) => return Ok(Some(email)),
            Ok(_) => {}
            Err(e) => warn!(
                inbox = %inbox.routing_hash,
                email_id = %encrypted.id,
                error = %e,
                "Skipping undecryptable email"
            ),
        }
    }
    Ok(None)
}

/// Keep one watcher per subscribed inbox.
async fn supervise(shared: Arc<Shared>) {
    let mut watchers: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.registry.changed() => {}
        }

        let wanted: HashSet<String> = shared.registry.routing_hashes().into_iter().collect();
        shared.gone.lock().retain(|hash| wanted.contains(hash));
        watchers.retain(|hash, task| {
            let keep = wanted.contains(hash) && !task.is_finished();
            if !keep {
                task.abort();
                debug!(inbox = %hash, "Stopped inbox watcher");
            }
            keep
        });
        for hash in wanted {
            if watchers.contains_key(&hash) || shared.gone.lock().contains(&hash) {
                continue;
            }
            if let Some(inbox) = shared.registry.inbox(&hash) {
                debug!(inbox = %hash, "Started inbox watcher");
                watchers.insert(hash, tokio::spawn(watch_inbox(Arc::clone(&shared), inbox)));
            }
        }
    }

    for (_, task) in watchers {
        task.abort();
    }
}

/// Deliver each not-yet-seen email of `inbox` once, on a fixed interval.
async fn watch_inbox(shared: Arc<Shared>, inbox: Arc<Inbox>) {
    let interval = shared.config.subscription_interval();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_digest: Option<String> = None;

    loop {
        match poll_new(&shared, &inbox, &mut seen, &mut last_digest).await {
            Ok(()) => {}
            Err(GatewayError::NotFound(what)) => {
                error!(inbox = %inbox.routing_hash, %what, "Inbox gone, stopping watcher");
                shared.gone.lock().insert(inbox.routing_hash.clone());
                return;
            }
            Err(e) => warn!(inbox = %inbox.routing_hash, error = %e, "Inbox poll failed"),
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn poll_new(
    shared: &Shared,
    inbox: &Inbox,
    seen: &mut HashSet<String>,
    last_digest: &mut Option<String>,
) -> Result<(), GatewayError> {
    let snapshot = shared.gateway.sync_status(&inbox.email_address).await?;
    if last_digest.as_deref() == Some(snapshot.emails_hash.as_str()) {
        return Ok(());
    }
    *last_digest = Some(snapshot.emails_hash);
    if snapshot.email_count == 0 {
        return Ok(());
    }

    let emails = shared.gateway.list_emails(&inbox.email_address).await?;
    for encrypted in emails {
        if !seen.insert(encrypted.id.clone()) {
            continue;
        }
        match Email::open(shared.crypto.as_ref(), inbox, &encrypted) {
            Ok(email) => {
                if shared.cancel.is_cancelled() {
                    return Ok(());
                }
                shared.registry.deliver(&inbox.routing_hash, &email);
            }
            Err(e) => warn!(
                inbox = %inbox.routing_hash,
                email_id = %encrypted.id,
                error = %e,
                "Rejected polled email"
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EncryptedEmail, ServerInfo, SyncSnapshot, TextMatcher};
    use crate::ports::inbound::email_callback;
    use qi_01_envelope_crypto::test_support::{
        test_keypair, Ed25519Primitive, EnvelopeSealer, GatedSignature, TestKem, TEST_CONTEXT,
    };
    use qi_01_envelope_crypto::{CryptoContext, Envelope, EnvelopeCryptoService};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// In-memory gateway with one mutable inbox.
    #[derive(Default)]
    struct MockGateway {
        emails: parking_lot::Mutex<Vec<EncryptedEmail>>,
        gone: AtomicBool,
        sync_calls: AtomicUsize,
        list_calls: AtomicUsize,
    }

    impl MockGateway {
        fn add(&self, inbox: &Inbox, id: &str, subject: &str) {
            let body = format!(r#"{{"subject":"{subject}","from":"s@x.test"}}"#);
            self.emails.lock().push(EncryptedEmail {
                id: id.into(),
                is_read: false,
                encrypted_metadata: EnvelopeSealer::new(9).seal(body.as_bytes(), &inbox.keypair.public_key),
                encrypted_parsed: None,
            });
        }
    }

    #[async_trait]
    impl InboxGateway for MockGateway {
        async fn server_info(&self) -> Result<ServerInfo, GatewayError> {
            Err(GatewayError::Status { status: 501, message: "unused".into() })
        }

        async fn sync_status(&self, address: &str) -> Result<SyncSnapshot, GatewayError> {
            self.sync_calls.fetch_add(1, Ordering::SeqCst);
            if self.gone.load(Ordering::SeqCst) {
                return Err(GatewayError::NotFound(address.to_string()));
            }
            let emails = self.emails.lock();
            Ok(SyncSnapshot {
                email_count: emails.len() as u64,
                emails_hash: emails.iter().map(|e| e.id.as_str()).collect::<Vec<_>>().join(","),
            })
        }

        async fn list_emails(&self, _: &str) -> Result<Vec<EncryptedEmail>, GatewayError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.emails.lock().clone())
        }

        async fn get_email(&self, _: &str, id: &str) -> Result<EncryptedEmail, GatewayError> {
            Err(GatewayError::NotFound(id.to_string()))
        }

        async fn get_raw_email(&self, _: &str, id: &str) -> Result<Envelope, GatewayError> {
            Err(GatewayError::NotFound(id.to_string()))
        }

        async fn mark_read(&self, _: &str, _: &str) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn config() -> PollingConfig {
        PollingConfig {
            initial_interval_ms: 100,
            backoff_multiplier: 1.5,
            max_backoff_ms: 1000,
            jitter_factor: 0.0,
            subscription_interval_ms: 50,
        }
    }

    fn setup() -> (PollingStrategy, Arc<MockGateway>, Arc<Inbox>) {
        let gateway = Arc::new(MockGateway::default());
        let crypto = Arc::new(EnvelopeCryptoService::new(
            TestKem,
            Ed25519Primitive,
            CryptoContext::new(TEST_CONTEXT),
        ));
        let strategy = PollingStrategy::new(config(), gateway.clone(), crypto);
        let inbox = Arc::new(Inbox::new("a@x.test", "hash-a", test_keypair(1)));
        (strategy, gateway, inbox)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_existing_match() {
        let (strategy, gateway, inbox) = setup();
        gateway.add(&inbox, "e1", "Welcome");
        gateway.add(&inbox, "e2", "Password Reset");

        let spec = WaitSpec::new(Duration::from_secs(5)).subject(TextMatcher::pattern("Reset").unwrap());
        let email = strategy.wait_for_email(inbox, spec).await.unwrap();
        assert_eq!(email.id(), "e2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_picks_up_later_email() {
        let (strategy, gateway, inbox) = setup();
        gateway.add(&inbox, "e1", "Welcome");
        let strategy = Arc::new(strategy);

        let s = Arc::clone(&strategy);
        let i = Arc::clone(&inbox);
        let waiter = tokio::spawn(async move {
            s.wait_for_email(i, WaitSpec::new(Duration::from_secs(30)).subject("Reset")).await
        });

        tokio::time::sleep(Duration::from_millis(700)).await;
        gateway.add(&inbox, "e2", "Reset your password");

        let email = waiter.await.unwrap().unwrap();
        assert_eq!(email.id(), "e2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_digest_skips_list() {
        let (strategy, gateway, inbox) = setup();
        gateway.add(&inbox, "e1", "Welcome");

        let err = strategy
            .wait_for_email(inbox, WaitSpec::new(Duration::from_secs(2)).subject("Reset"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Timeout { timeout_ms: 2000 }));
        assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);
        assert!(gateway.sync_calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_reduces_polls() {
        let (strategy, gateway, inbox) = setup();
        let _ = strategy
            .wait_for_email(inbox, WaitSpec::new(Duration::from_secs(5)))
            .await;

        // 100ms base growing by 1.5x (capped at 1s) fits 9 checks in 5s;
        // a fixed 100ms interval would make about 50.
        let calls = gateway.sync_calls.load(Ordering::SeqCst);
        assert!(calls <= 10, "too many sync calls: {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_propagates_immediately() {
        let (strategy, gateway, inbox) = setup();
        gateway.gone.store(true, Ordering::SeqCst);

        let err = strategy
            .wait_for_email(inbox, WaitSpec::new(Duration::from_secs(30)))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::ResourceNotFound("a@x.test".into()));
        assert_eq!(gateway.sync_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout() {
        let (strategy, gateway, inbox) = setup();
        let err = strategy
            .wait_for_email(inbox, WaitSpec::new(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { .. }));
        assert_eq!(gateway.sync_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_delivers_each_email_once() {
        let (strategy, gateway, inbox) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = strategy
            .subscribe(
                Arc::clone(&inbox),
                email_callback(move |email| {
                    let _ = tx.send(email.id().to_string());
                    Ok(())
                }),
            )
            .unwrap();

        gateway.add(&inbox, "e1", "one");
        assert_eq!(rx.recv().await.unwrap(), "e1");
        gateway.add(&inbox, "e2", "two");
        assert_eq!(rx.recv().await.unwrap(), "e2");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err(), "no duplicate deliveries");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_keeps_watcher_alive() {
        let (strategy, gateway, inbox) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _bad = strategy
            .subscribe(Arc::clone(&inbox), email_callback(|_| Err("subscriber bug".into())))
            .unwrap();
        let _good = strategy
            .subscribe(
                Arc::clone(&inbox),
                email_callback(move |email| {
                    let _ = tx.send(email.id().to_string());
                    Ok(())
                }),
            )
            .unwrap();

        gateway.add(&inbox, "e1", "one");
        assert_eq!(rx.recv().await.unwrap(), "e1");
        gateway.add(&inbox, "e2", "two");
        assert_eq!(rx.recv().await.unwrap(), "e2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_polling() {
        let (strategy, gateway, inbox) = setup();
        let handle = strategy
            .subscribe(Arc::clone(&inbox), email_callback(|_| Ok(())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_unsubscribe = gateway.sync_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(gateway.sync_calls.load(Ordering::SeqCst), after_unsubscribe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_inbox_is_not_rewatched() {
        let (strategy, gateway, inbox) = setup();
        gateway.gone.store(true, Ordering::SeqCst);

        let first = strategy
            .subscribe(Arc::clone(&inbox), email_callback(|_| Ok(())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.sync_calls.load(Ordering::SeqCst), 1);

        let second = strategy
            .subscribe(Arc::clone(&inbox), email_callback(|_| Ok(())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.sync_calls.load(Ordering::SeqCst), 1);

        // A fresh subscription after all handles are gone checks again.
        drop(first);
        drop(second);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _again = strategy
            .subscribe(Arc::clone(&inbox), email_callback(|_| Ok(())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.sync_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_with_unbounded_timeout() {
        let (strategy, gateway, inbox) = setup();
        gateway.add(&inbox, "e1", "Welcome");

        let email = strategy
            .wait_for_email(inbox, WaitSpec::new(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(email.id(), "e1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_discards_in_flight_decryption() {
        let gateway = Arc::new(MockGateway::default());
        let (signature, gate) = GatedSignature::new();
        let crypto = Arc::new(EnvelopeCryptoService::new(
            TestKem,
            signature,
            CryptoContext::new(TEST_CONTEXT),
        ));
        let strategy = PollingStrategy::new(config(), gateway.clone(), crypto);
        let inbox = Arc::new(Inbox::new("a@x.test", "hash-a", test_keypair(1)));
        gateway.add(&inbox, "e1", "Late");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = strategy
            .subscribe(
                Arc::clone(&inbox),
                email_callback(move |email| {
                    let _ = tx.send(email.id().to_string());
                    Ok(())
                }),
            )
            .unwrap();

        let entered = tokio::task::block_in_place(|| gate.wait_entered(Duration::from_secs(2)));
        assert!(entered, "verification should be in flight");

        strategy.close().await;
        gate.release();

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("callback dropped on close");
        assert_eq!(outcome, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_wait() {
        let (strategy, _gateway, inbox) = setup();
        let strategy = Arc::new(strategy);
        let s = Arc::clone(&strategy);
        let waiter = tokio::spawn(async move {
            s.wait_for_email(inbox, WaitSpec::new(Duration::from_secs(60))).await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        strategy.close().await;
        assert_eq!(waiter.await.unwrap().unwrap_err(), DeliveryError::Closed);
    }
}
