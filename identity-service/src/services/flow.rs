//! The multi-factor authentication state machine.
//!
//! [`advance`] is a pure transition function over [`FlowState`] and
//! [`FlowEvent`]; it knows nothing about HTTP, storage or timers. The
//! [`AttemptService`] below applies those transitions to concrete
//! [`AuthenticationAttempt`] records with single-winner semantics per
//! attempt token.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AttemptConfig;
use crate::models::{AttemptKind, AuthenticationAttempt, Factor};
use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    PrimaryFactorPending,
    TotpPending,
    SmsPending,
    PhoneConfirmationPending,
    Authenticated,
    Failed,
    Cancelled,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Authenticated | FlowState::Failed | FlowState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    Begin,
    /// Primary credential verified; the flags say which further factors
    /// the user has configured.
    PasswordVerified {
        totp_configured: bool,
        sms_configured: bool,
    },
    /// TOTP code checked against the secret; `true` means within skew.
    TotpCode(bool),
    /// SMS code checked against the delivered one.
    SmsCode(bool),
    PhoneConfirmed,
    /// External identity provider reported a verified identity.
    ExternalVerified,
    Expired,
    Cancel,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    SendSmsCode,
    ExpectTotp,
    EstablishSession,
    ActivateUser,
    ReleaseAttempt,
}

/// Pure transition function. Unexpected (state, event) pairs do not move
/// the machine; the caller surfaces those as step mismatches.
pub fn advance(state: FlowState, event: FlowEvent) -> (FlowState, Vec<SideEffect>) {
    use FlowEvent as E;
    use FlowState as S;
    use SideEffect as F;

    if !state.is_terminal() {
        match event {
            E::Cancel => return (S::Cancelled, vec![F::ReleaseAttempt]),
            E::Expired => return (S::Failed, vec![F::ReleaseAttempt]),
            E::RetriesExhausted => return (S::Failed, vec![F::ReleaseAttempt]),
            _ => {}
        }
    }

    match (state, event) {
        (S::Start, E::Begin) => (S::PrimaryFactorPending, vec![]),

        (S::PrimaryFactorPending, E::PasswordVerified { totp_configured: true, .. }) => {
            (S::TotpPending, vec![F::ExpectTotp])
        }
        (
            S::PrimaryFactorPending,
            E::PasswordVerified {
                totp_configured: false,
                sms_configured: true,
            },
        ) => (S::SmsPending, vec![F::SendSmsCode]),
        (
            S::PrimaryFactorPending,
            E::PasswordVerified {
                totp_configured: false,
                sms_configured: false,
            },
        ) => (S::Authenticated, vec![F::EstablishSession, F::ReleaseAttempt]),

        (S::PrimaryFactorPending, E::ExternalVerified) => {
            (S::Authenticated, vec![F::EstablishSession, F::ReleaseAttempt])
        }

        (S::TotpPending, E::TotpCode(true)) => {
            (S::Authenticated, vec![F::EstablishSession, F::ReleaseAttempt])
        }
        (S::TotpPending, E::TotpCode(false)) => (S::TotpPending, vec![]),

        (S::SmsPending, E::SmsCode(true)) => {
            (S::Authenticated, vec![F::EstablishSession, F::ReleaseAttempt])
        }
        (S::SmsPending, E::SmsCode(false)) => (S::SmsPending, vec![]),

        (S::PhoneConfirmationPending, E::PhoneConfirmed) => (
            S::Authenticated,
            vec![F::ActivateUser, F::EstablishSession, F::ReleaseAttempt],
        ),

        (state, _) => (state, vec![]),
    }
}

/// Map an attempt's outstanding factors to the state the machine is in.
pub fn pending_state(remaining: &[Factor]) -> FlowState {
    match remaining.first() {
        Some(Factor::Totp) => FlowState::TotpPending,
        Some(Factor::Sms) => FlowState::SmsPending,
        Some(Factor::PhoneConfirmation) => FlowState::PhoneConfirmationPending,
        None => FlowState::Authenticated,
    }
}

/// The factor chain a verified password leads into.
pub fn required_factors(totp_configured: bool, sms_configured: bool) -> Vec<Factor> {
    let mut factors = Vec::new();
    if totp_configured {
        factors.push(Factor::Totp);
    }
    if sms_configured && !totp_configured {
        // TOTP satisfies the second-factor requirement; SMS is only
        // required when it is the sole configured factor.
        factors.push(Factor::Sms);
    }
    factors
}

/// A freshly issued confirmation: the short code the user types back
/// in-band, and the long single-use key carried by the out-of-band
/// confirmation link in the same message.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub link_key: String,
}

/// Outcome of a successful step submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// All factors satisfied; the attempt is complete and released.
    Authenticated { username: String, kind: AttemptKind },
    /// Another factor is outstanding.
    Next { factor: Factor },
}

/// Owns the table of in-flight attempts. Each transition is a
/// read-modify-write under the dashmap entry lock, so of two concurrent
/// submissions for the same token at most one wins; the other observes
/// the post-transition state.
pub struct AttemptService {
    attempts: DashMap<String, AuthenticationAttempt>,
    lifetime: Duration,
    code_lifetime: Duration,
    max_retries: u8,
}

impl AttemptService {
    pub fn new(config: &AttemptConfig) -> Self {
        Self {
            attempts: DashMap::new(),
            lifetime: Duration::seconds(config.attempt_lifetime_seconds),
            code_lifetime: Duration::seconds(config.sms_code_lifetime_seconds),
            max_retries: config.max_code_retries,
        }
    }

    /// Start an attempt with the given outstanding factor chain. Returns
    /// the attempt token.
    pub fn begin(
        &self,
        username: String,
        kind: AttemptKind,
        remaining: Vec<Factor>,
    ) -> String {
        let attempt =
            AuthenticationAttempt::new(username, kind, remaining, self.lifetime, self.max_retries);
        let token = attempt.token.clone();
        self.attempts.insert(token.clone(), attempt);
        token
    }

    /// Generate and store a fresh confirmation code and link key for the
    /// attempt's current SMS/phone step. Re-issuing replaces both and
    /// the expiry without changing state. Returns the plain values for
    /// delivery.
    pub fn issue_code(&self, token: &str) -> Result<IssuedCode, ServiceError> {
        let mut entry = self
            .attempts
            .get_mut(token)
            .ok_or(ServiceError::AttemptNotFound)?;
        if entry.is_expired(Utc::now()) {
            drop(entry);
            self.attempts.remove(token);
            return Err(ServiceError::AttemptExpired);
        }
        match entry.current_step() {
            Some(Factor::Sms) | Some(Factor::PhoneConfirmation) => {}
            _ => return Err(ServiceError::AttemptAlreadyAdvanced),
        }

        let issued = IssuedCode {
            code: generate_code(),
            link_key: generate_link_key(),
        };
        entry.code_hash = Some(hash_code(&issued.code));
        entry.link_key_hash = Some(hash_code(&issued.link_key));
        entry.code_expires_at = Some(Utc::now() + self.code_lifetime);
        Ok(issued)
    }

    /// Submit the delivered code for the current SMS/phone step.
    pub fn submit_code(&self, token: &str, code: &str) -> Result<StepOutcome, ServiceError> {
        let mut entry = self
            .attempts
            .get_mut(token)
            .ok_or(ServiceError::AttemptNotFound)?;
        let now = Utc::now();
        if entry.is_expired(now) {
            drop(entry);
            self.attempts.remove(token);
            return Err(ServiceError::AttemptExpired);
        }
        match entry.current_step() {
            Some(Factor::Sms) | Some(Factor::PhoneConfirmation) => {}
            _ => return Err(ServiceError::AttemptAlreadyAdvanced),
        }

        let valid = match &entry.code_hash {
            Some(expected) if !entry.code_expired(now) => code_matches(expected, code),
            _ => false,
        };

        if !valid {
            return self.record_failure(entry, token);
        }

        entry.code_hash = None;
        entry.link_key_hash = None;
        entry.code_expires_at = None;
        entry.remaining.remove(0);
        entry.confirmed = true;
        self.conclude(entry, token)
    }

    /// Advance past the TOTP step. The caller has already validated the
    /// code against the user's secret; the step check here is what makes
    /// the transition single-winner.
    pub fn submit_totp(&self, token: &str, valid: bool) -> Result<StepOutcome, ServiceError> {
        let mut entry = self
            .attempts
            .get_mut(token)
            .ok_or(ServiceError::AttemptNotFound)?;
        if entry.is_expired(Utc::now()) {
            drop(entry);
            self.attempts.remove(token);
            return Err(ServiceError::AttemptExpired);
        }
        if entry.current_step() != Some(Factor::Totp) {
            return Err(ServiceError::AttemptAlreadyAdvanced);
        }

        if !valid {
            return self.record_failure(entry, token);
        }

        entry.remaining.remove(0);
        self.conclude(entry, token)
    }

    /// Consume an out-of-band confirmation link key. Single-use: the key
    /// is destroyed on first consumption, replay finds nothing. Only the
    /// long link key matches here; the short in-band code is not
    /// accepted, so the link endpoint cannot be used to guess it.
    /// Returns the username the attempt belongs to.
    pub fn confirm_out_of_band(&self, link_key: &str) -> Result<String, ServiceError> {
        let now = Utc::now();
        let token = self
            .attempts
            .iter()
            .find(|entry| {
                entry
                    .link_key_hash
                    .as_deref()
                    .map(|expected| !entry.code_expired(now) && code_matches(expected, link_key))
                    .unwrap_or(false)
            })
            .map(|entry| entry.token.clone())
            .ok_or(ServiceError::AttemptNotFound)?;

        // Re-check under the entry lock; a concurrent submission may have
        // consumed the key between the scan and here.
        let mut entry = self
            .attempts
            .get_mut(&token)
            .ok_or(ServiceError::AttemptNotFound)?;
        let still_valid = entry
            .link_key_hash
            .as_deref()
            .map(|expected| !entry.code_expired(now) && code_matches(expected, link_key))
            .unwrap_or(false);
        if !still_valid {
            return Err(ServiceError::AttemptNotFound);
        }
        entry.code_hash = None;
        entry.link_key_hash = None;
        entry.code_expires_at = None;
        match entry.current_step() {
            Some(Factor::Sms) | Some(Factor::PhoneConfirmation) => {
                entry.remaining.remove(0);
            }
            _ => return Err(ServiceError::AttemptAlreadyAdvanced),
        }
        entry.confirmed = true;
        Ok(entry.username.clone())
    }

    /// Whether the attempt has been fully confirmed (for polling
    /// endpoints that wait on an out-of-band click).
    pub fn is_confirmed(&self, token: &str) -> Result<bool, ServiceError> {
        let entry = self
            .attempts
            .get(token)
            .ok_or(ServiceError::AttemptNotFound)?;
        if entry.is_expired(Utc::now()) {
            drop(entry);
            self.attempts.remove(token);
            return Err(ServiceError::AttemptExpired);
        }
        Ok(entry.confirmed && entry.remaining.is_empty())
    }

    /// Complete a fully-verified attempt: removes it and hands back the
    /// principal. Exactly one caller wins.
    pub fn complete(&self, token: &str) -> Result<(String, AttemptKind), ServiceError> {
        {
            let entry = self
                .attempts
                .get(token)
                .ok_or(ServiceError::AttemptNotFound)?;
            if entry.is_expired(Utc::now()) {
                drop(entry);
                self.attempts.remove(token);
                return Err(ServiceError::AttemptExpired);
            }
            if !entry.remaining.is_empty() {
                return Err(ServiceError::AttemptAlreadyAdvanced);
            }
        }
        let (_, attempt) = self
            .attempts
            .remove(token)
            .ok_or(ServiceError::AttemptNotFound)?;
        Ok((attempt.username, attempt.kind))
    }

    /// Peek at an attempt without mutating it.
    pub fn get(&self, token: &str) -> Result<AuthenticationAttempt, ServiceError> {
        let entry = self
            .attempts
            .get(token)
            .ok_or(ServiceError::AttemptNotFound)?;
        if entry.is_expired(Utc::now()) {
            drop(entry);
            self.attempts.remove(token);
            return Err(ServiceError::AttemptExpired);
        }
        Ok(entry.clone())
    }

    /// Cancel an in-flight attempt; the token is released immediately.
    pub fn cancel(&self, token: &str) -> Result<(), ServiceError> {
        self.attempts
            .remove(token)
            .map(|_| ())
            .ok_or(ServiceError::AttemptNotFound)
    }

    /// Reclaim expired attempts. Memory hygiene only; expiry is enforced
    /// on every access regardless.
    pub fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.attempts.len();
        self.attempts.retain(|_, attempt| !attempt.is_expired(now));
        before - self.attempts.len()
    }

    fn record_failure(
        &self,
        mut entry: dashmap::mapref::one::RefMut<'_, String, AuthenticationAttempt>,
        token: &str,
    ) -> Result<StepOutcome, ServiceError> {
        entry.retries_left = entry.retries_left.saturating_sub(1);
        if entry.retries_left == 0 {
            drop(entry);
            self.attempts.remove(token);
        }
        Err(ServiceError::InvalidCode)
    }

    fn conclude(
        &self,
        entry: dashmap::mapref::one::RefMut<'_, String, AuthenticationAttempt>,
        token: &str,
    ) -> Result<StepOutcome, ServiceError> {
        if let Some(factor) = entry.current_step() {
            return Ok(StepOutcome::Next { factor });
        }
        let username = entry.username.clone();
        let kind = entry.kind;
        drop(entry);
        self.attempts.remove(token);
        Ok(StepOutcome::Authenticated { username, kind })
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

/// 128-bit random key for the out-of-band link, hex encoded.
fn generate_link_key() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub(crate) fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn code_matches(expected_hash: &str, submitted: &str) -> bool {
    hash_code(submitted)
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}
