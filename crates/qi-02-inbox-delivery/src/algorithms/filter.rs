//! # Email Filter
//!
//! Evaluates a wait specification against a decrypted email. Every
//! configured rule must pass.

use crate::domain::{Email, WaitSpec};

/// Whether `email` satisfies the subject, sender, and predicate rules.
pub fn matches(spec: &WaitSpec, email: &Email) -> bool {
    let meta = email.metadata();

    if let Some(subject) = &spec.subject {
        if !subject.matches(&meta.subject) {
            return false;
        }
    }
    if let Some(from) = &spec.from {
        if !from.matches(&meta.from) {
            return false;
        }
    }
    spec.predicate.as_ref().map_or(true, |p| p(email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TextMatcher;
    use qi_01_envelope_crypto::EmailMetadata;
    use std::time::Duration;

    fn email(subject: &str, from: &str) -> Email {
        let meta = EmailMetadata {
            subject: subject.into(),
            from: from.into(),
            ..Default::default()
        };
        Email::new("e", "a@x.test", meta, None, false)
    }

    #[test]
    fn test_empty_spec_matches_anything() {
        assert!(matches(&WaitSpec::default(), &email("Welcome", "x@y.test")));
    }

    #[test]
    fn test_subject_pattern() {
        let spec = WaitSpec::new(Duration::from_secs(1))
            .subject(TextMatcher::pattern("Reset").unwrap());
        assert!(!matches(&spec, &email("Welcome", "x@y.test")));
        assert!(matches(&spec, &email("Password Reset", "x@y.test")));
    }

    #[test]
    fn test_all_rules_must_pass() {
        let spec = WaitSpec::default()
            .subject("Reset")
            .sender("noreply@")
            .predicate(|e| e.id() == "e");
        assert!(matches(&spec, &email("Reset", "noreply@x.test")));
        assert!(!matches(&spec, &email("Reset", "support@x.test")));

        let rejecting = spec.clone().predicate(|_| false);
        assert!(!matches(&rejecting, &email("Reset", "noreply@x.test")));
    }
}
