//! # Stream Strategy
//!
//! One event-stream connection for every subscribed inbox.
//!
//! ## Connection lifecycle
//!
//! - The connection is keyed by the sorted set of subscribed routing hashes.
//! - Registry changes wake a single reconcile loop. It tears the reader down
//!   and reconnects with the new hash set, or just closes when the set is
//!   empty. Connection state sits behind one async mutex, so teardown and
//!   connect never interleave.
//! - The reader reconnects on connection loss after
//!   `base × multiplier^attempts`; a successful open resets `attempts`.
//!   Running out of attempts broadcasts `StreamExhausted` on `errors()`,
//!   which also rejects every pending wait.

use crate::algorithms::reconnect_delay;
use crate::config::StreamConfig;
use crate::domain::{DeliveryError, Email, GatewayError, Inbox, StreamMessage};
use crate::ports::inbound::{DeliveryStrategy, EmailCallback};
use crate::ports::outbound::StreamConnector;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use async_trait::async_trait;
use futures::StreamExt;
use qi_01_envelope_crypto::EnvelopeDecryptionApi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Current physical connection.
#[derive(Default)]
struct Connection {
    routing_hashes: Vec<String>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.routing_hashes.clear();
    }
}

struct Shared {
    config: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    crypto: Arc<dyn EnvelopeDecryptionApi>,
    registry: Arc<SubscriptionRegistry>,
    errors: broadcast::Sender<DeliveryError>,
    connection: Mutex<Connection>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Event-stream delivery strategy.
pub struct StreamStrategy {
    shared: Arc<Shared>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamStrategy {
    /// Create the strategy and start its reconcile loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: StreamConfig,
        connector: Arc<dyn StreamConnector>,
        crypto: Arc<dyn EnvelopeDecryptionApi>,
    ) -> Self {
        let (errors, _) = broadcast::channel(config.error_channel_capacity.max(1));
        let shared = Arc::new(Shared {
            config,
            connector,
            crypto,
            registry: SubscriptionRegistry::new(),
            errors,
            connection: Mutex::new(Connection::default()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        let supervisor = tokio::spawn(reconcile_loop(Arc::clone(&shared)));
        Self {
            shared,
            supervisor: parking_lot::Mutex::new(Some(supervisor)),
        }
    }

    /// Routing hashes of the live connection (empty when disconnected).
    pub async fn connected_hashes(&self) -> Vec<String> {
        self.shared.connection.lock().await.routing_hashes.clone()
    }

    /// The subscription registry backing this strategy.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }
}

#[async_trait]
impl DeliveryStrategy for StreamStrategy {
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
        info!("Closing event stream strategy");
        self.shared.cancel.cancel();
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        self.shared.connection.lock().await.teardown();
        self.shared.registry.clear();
        let _ = self.shared.errors.send(DeliveryError::Closed);
    }
}

impl Drop for StreamStrategy {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        if let Ok(mut connection) = self.shared.connection.try_lock() {
            connection.teardown();
        }
    }
}

async fn reconcile_loop(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.registry.changed() => {}
        }
        reconcile(&shared).await;
    }
    debug!("Stream reconcile loop exited");
}

/// Bring the connection in line with the registry.
async fn reconcile(shared: &Arc<Shared>) {
    let wanted = shared.registry.routing_hashes();
    let mut connection = shared.connection.lock().await;

    let reader_alive = connection
        .reader
        .as_ref()
        .is_some_and(|r| !r.is_finished());
    if wanted == connection.routing_hashes && (reader_alive || wanted.is_empty()) {
        return;
    }

    connection.teardown();
    if wanted.is_empty() || shared.cancel.is_cancelled() {
        info!("No subscriptions left, event stream closed");
        return;
    }

    info!(inboxes = wanted.len(), "Connecting event stream");
    connection.reader = Some(tokio::spawn(run_reader(
        Arc::clone(shared),
        wanted.clone(),
    )));
    connection.routing_hashes = wanted;
}

/// Own one logical connection, reconnecting until exhausted or aborted.
async fn run_reader(shared: Arc<Shared>, routing_hashes: Vec<String>) {
    let max_attempts = shared.config.max_reconnect_attempts;
    let mut attempts: u32 = 0;

    loop {
        match shared.connector.connect(&routing_hashes).await {
            Ok(mut stream) => {
                if attempts > 0 {
                    info!(attempts, "Event stream reconnected");
                }
                attempts = 0;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(message) => handle_message(&shared, message),
                        Err(GatewayError::Decode(e)) => {
                            warn!(error = %e, "Dropping undecodable stream message");
                        }
                        Err(e) => {
                            warn!(error = %e, "Event stream connection error");
                            break;
                        }
                    }
                }
                debug!("Event stream ended");
            }
            Err(e) => warn!(error = %e, attempt = attempts, "Event stream connect failed"),
        }

        if shared.cancel.is_cancelled() {
            return;
        }
        if attempts >= max_attempts {
            error!(attempts, "Event stream reconnection attempts exhausted");
            let _ = shared
                .errors
                .send(DeliveryError::StreamExhausted { attempts });
            return;
        }

        let delay = reconnect_delay(
            shared.config.reconnect_interval(),
            shared.config.backoff_multiplier,
            attempts,
        );
        attempts += 1;
        debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Route one message to its subscription, decrypt, fan out.
fn handle_message(shared: &Shared, message: StreamMessage) {
    let Some(inbox) = shared.registry.inbox(&message.inbox_id) else {
        debug!(inbox = %message.inbox_id, "Dropping message for unknown inbox");
        return;
    };

    match Email::from_stream(shared.crypto.as_ref(), &inbox, &message) {
        Ok(email) => {
            if shared.cancel.is_cancelled() {
                return;
            }
            let delivered = shared.registry.deliver(&message.inbox_id, &email);
            debug!(inbox = %message.inbox_id, email_id = %email.id(), delivered, "Delivered email");
        }
        Err(e) => warn!(
            inbox = %message.inbox_id,
            email_id = %message.email_id,
            error = %e,
            "Rejected stream email"
        ),
    }
}
