//! # Wait Specification
//!
//! Timeout and filter for a single wait call.

use super::entities::Email;
use super::matcher::TextMatcher;
use std::sync::Arc;
use std::time::Duration;

/// Default wait timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Custom email predicate.
pub type EmailPredicate = Arc<dyn Fn(&Email) -> bool + Send + Sync>;

/// What a wait is looking for, and for how long.
#[derive(Clone)]
pub struct WaitSpec {
    /// Deadline relative to the call.
    pub timeout: Duration,
    /// Base poll interval override (polling strategy only).
    pub poll_interval: Option<Duration>,
    /// Subject rule.
    pub subject: Option<TextMatcher>,
    /// Sender rule.
    pub from: Option<TextMatcher>,
    /// Custom predicate.
    pub predicate: Option<EmailPredicate>,
}

impl WaitSpec {
    /// Match-anything spec with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: None,
            subject: None,
            from: None,
            predicate: None,
        }
    }

    /// Require the subject to match.
    pub fn subject(mut self, matcher: impl Into<TextMatcher>) -> Self {
        self.subject = Some(matcher.into());
        self
    }

    /// Require the sender to match.
    pub fn sender(mut self, matcher: impl Into<TextMatcher>) -> Self {
        self.from = Some(matcher.into());
        self
    }

    /// Require a custom predicate to pass.
    pub fn predicate(mut self, f: impl Fn(&Email) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(f));
        self
    }

    /// Override the base poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_TIMEOUT)
    }
}

impl std::fmt::Debug for WaitSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitSpec")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("subject", &self.subject)
            .field("from", &self.from)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
