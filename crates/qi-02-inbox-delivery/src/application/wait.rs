//! # Wait Coordinator
//!
//! Races a strategy subscription against a deadline.
//!
//! Whichever of {matching email, deadline, fatal strategy error} happens
//! first resolves the wait. The subscription handle is owned by the wait and
//! dropped on every exit path, which unsubscribes; the deadline timer is a
//! future owned by the same scope and is dropped with it.

use crate::algorithms::{deadline_after, filter};
use crate::domain::{DeliveryError, Email, Inbox, WaitSpec};
use crate::ports::inbound::{email_callback, DeliveryStrategy};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout_at;
use tracing::debug;

/// Wait for the first delivered email matching `spec`.
///
/// A zero timeout resolves to `Timeout` without subscribing.
pub async fn wait_for_one<S>(
    strategy: &S,
    inbox: Arc<Inbox>,
    spec: WaitSpec,
) -> Result<Email, DeliveryError>
where
    S: DeliveryStrategy + ?Sized,
{
    if spec.timeout.is_zero() {
        return Err(DeliveryError::timeout(spec.timeout));
    }
    let deadline = deadline_after(spec.timeout);

    // Error receiver first, so a close racing with subscribe is never missed.
    let mut errors = strategy.errors();
    let (tx, mut rx) = mpsc::unbounded_channel::<Email>();
    let _subscription = strategy.subscribe(
        Arc::clone(&inbox),
        email_callback(move |email| {
            // A closed channel means the wait already resolved.
            let _ = tx.send(email.clone());
            Ok(())
        }),
    )?;

    let outcome = timeout_at(deadline, async {
        loop {
            tokio::select! {
                biased;
                fatal = next_fatal(&mut errors) => return Err(fatal),
                email = rx.recv() => match email {
                    Some(email) if filter::matches(&spec, &email) => return Ok(email),
                    Some(email) => {
                        debug!(inbox = %inbox.routing_hash, email_id = %email.id(), "Email did not match wait filter");
                    }
                    None => return Err(DeliveryError::Closed),
                },
            }
        }
    })
    .await;

    outcome.unwrap_or_else(|_| Err(DeliveryError::timeout(spec.timeout)))
}

/// Wait until the inbox holds at least `count` emails.
///
/// `current_count` is checked once up front, returning without subscribing
/// when the target is already met. Otherwise it is re-checked right after
/// subscribing and again after every delivered email. Errors from it end
/// the wait.
pub async fn wait_for_count<S, F, Fut>(
    strategy: &S,
    inbox: Arc<Inbox>,
    count: usize,
    timeout: Duration,
    mut current_count: F,
) -> Result<usize, DeliveryError>
where
    S: DeliveryStrategy + ?Sized,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<usize, DeliveryError>> + Send,
{
    let deadline = deadline_after(timeout);
    let mut errors = strategy.errors();

    let outcome = timeout_at(deadline, async {
        let n = current_count().await?;
        if n >= count {
            return Ok(n);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let _subscription = strategy.subscribe(
            Arc::clone(&inbox),
            email_callback(move |_| {
                let _ = tx.send(());
                Ok(())
            }),
        )?;

        // Emails that arrived before the subscription existed.
        let n = current_count().await?;
        if n >= count {
            return Ok(n);
        }
        loop {
            tokio::select! {
                biased;
                fatal = next_fatal(&mut errors) => return Err(fatal),
                notified = rx.recv() => {
                    if notified.is_none() {
                        return Err(DeliveryError::Closed);
                    }
                    let n = current_count().await?;
                    debug!(inbox = %inbox.routing_hash, count = n, target = count, "Email count re-checked");
                    if n >= count {
                        return Ok(n);
                    }
                }
            }
        }
    })
    .await;

    outcome.unwrap_or_else(|_| Err(DeliveryError::timeout(timeout)))
}

async fn next_fatal(errors: &mut broadcast::Receiver<DeliveryError>) -> DeliveryError {
    loop {
        match errors.recv().await {
            Ok(e) => return e,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return DeliveryError::Closed,
        }
    }
}
