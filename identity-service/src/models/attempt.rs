//! In-progress login/registration attempts, keyed by a server-issued token.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// A verification step a principal still has to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    Totp,
    Sms,
    PhoneConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Login,
    Registration,
}

/// Transient state of one authentication sequence. Created when a
/// login/registration begins, destroyed on success, cancellation or
/// expiry. Mutated only through the attempt service, one transition at a
/// time.
#[derive(Debug, Clone)]
pub struct AuthenticationAttempt {
    pub token: String,
    pub username: String,
    pub kind: AttemptKind,

    /// Ordered factors not yet satisfied. Empty means the attempt is
    /// fully verified and waiting to be completed.
    pub remaining: Vec<Factor>,

    /// sha256 hex of the outstanding SMS/phone-confirmation code.
    /// Single-use; cleared on consumption.
    pub code_hash: Option<String>,

    /// sha256 hex of the long key embedded in the out-of-band
    /// confirmation link. Issued and cleared together with the code;
    /// the short code itself is never accepted out-of-band.
    pub link_key_hash: Option<String>,

    pub code_expires_at: Option<DateTime<Utc>>,

    pub retries_left: u8,

    /// Set when an out-of-band confirmation (link click) has landed, for
    /// the polling endpoints.
    pub confirmed: bool,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticationAttempt {
    pub fn new(
        username: String,
        kind: AttemptKind,
        remaining: Vec<Factor>,
        lifetime: Duration,
        retries: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            token: Uuid::new_v4().to_string(),
            username,
            kind,
            remaining,
            code_hash: None,
            link_key_hash: None,
            code_expires_at: None,
            retries_left: retries,
            confirmed: false,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn code_expired(&self, now: DateTime<Utc>) -> bool {
        self.code_expires_at.map(|t| now >= t).unwrap_or(true)
    }

    /// The step currently awaiting proof, if any.
    pub fn current_step(&self) -> Option<Factor> {
        self.remaining.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_expires_after_lifetime() {
        let attempt = AuthenticationAttempt::new(
            "alice".to_string(),
            AttemptKind::Login,
            vec![Factor::Totp],
            Duration::seconds(600),
            3,
        );
        assert!(!attempt.is_expired(Utc::now()));
        assert!(attempt.is_expired(Utc::now() + Duration::seconds(601)));
    }

    #[test]
    fn missing_code_counts_as_expired() {
        let attempt = AuthenticationAttempt::new(
            "alice".to_string(),
            AttemptKind::Registration,
            vec![Factor::PhoneConfirmation],
            Duration::seconds(600),
            3,
        );
        assert!(attempt.code_expired(Utc::now()));
    }
}
