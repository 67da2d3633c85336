//! Orchestration of registration and login flows: wires the store, the
//! attempt table, TOTP validation and SMS delivery together.

use std::sync::Arc;

use crate::models::{
    validate_user, AttemptKind, ExternalIdentity, Factor, Phonenumber, User, UserStatus,
};
use crate::services::flow::{pending_state, required_factors, FlowState, IssuedCode, StepOutcome};
use crate::services::{totp, AttemptService, IdentityStore, ServiceError, SmsProvider};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Result of beginning a login: either straight through to a session, or
/// an attempt token plus the step now pending. `delivery_failed` flags
/// an SMS that did not go out; the step can be retried through resend.
#[derive(Debug, Clone)]
pub struct LoginStart {
    pub token: Option<String>,
    pub state: FlowState,
    pub delivery_failed: bool,
}

/// Result of beginning a registration: the attempt token, plus whether
/// the confirmation SMS actually went out.
#[derive(Debug, Clone)]
pub struct RegistrationStart {
    pub token: String,
    pub delivery_failed: bool,
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    attempts: Arc<AttemptService>,
    sms: Arc<dyn SmsProvider>,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        attempts: Arc<AttemptService>,
        sms: Arc<dyn SmsProvider>,
    ) -> Self {
        Self {
            store,
            attempts,
            sms,
        }
    }

    /// Begin registration: create the unconfirmed user and send the
    /// phone confirmation code. Returns the attempt token. A username
    /// held only by an earlier registration that never confirmed its
    /// phone is not burned; the new registration supersedes the stale
    /// record and restarts from the beginning.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        phonenumber: &str,
    ) -> Result<RegistrationStart, ServiceError> {
        let mut user = User::new(username.to_string());
        validate_user(&user)?;

        let hash = hash_password(&Password::new(password.to_string()))
            .map_err(ServiceError::Internal)?;
        user.password_hash = Some(hash.into_string());
        user.phonenumbers.push(Phonenumber {
            label: "main".to_string(),
            phonenumber: phonenumber.to_string(),
            verified: false,
        });

        match self.store.get_user(username).await? {
            Some(existing) if existing.is_active() => {
                return Err(ServiceError::UserAlreadyExists)
            }
            Some(_) => self.store.update_user(&user).await?,
            None => self.store.insert_user(&user).await?,
        }
        tracing::info!(username = %username, "User registered, phone confirmation pending");

        let token = self.attempts.begin(
            username.to_string(),
            AttemptKind::Registration,
            vec![Factor::PhoneConfirmation],
        );
        let issued = self.attempts.issue_code(&token)?;
        let delivery_failed = self.deliver(phonenumber, &issued).await?;
        Ok(RegistrationStart {
            token,
            delivery_failed,
        })
    }

    /// Submit the phone confirmation code directly. On success the user
    /// becomes active and the caller may establish a session.
    pub async fn confirm_registration(
        &self,
        token: &str,
        code: &str,
    ) -> Result<String, ServiceError> {
        match self.attempts.submit_code(token, code)? {
            StepOutcome::Authenticated { username, kind } => {
                if kind != AttemptKind::Registration {
                    return Err(ServiceError::AttemptNotFound);
                }
                self.activate_user(&username).await?;
                Ok(username)
            }
            StepOutcome::Next { .. } => Err(ServiceError::AttemptAlreadyAdvanced),
        }
    }

    /// Consume an out-of-band confirmation link. Single-use; activates
    /// the user immediately, session establishment waits for the poll.
    pub async fn confirm_phone_link(&self, link_key: &str) -> Result<String, ServiceError> {
        let username = self.attempts.confirm_out_of_band(link_key)?;
        self.activate_user(&username).await?;
        Ok(username)
    }

    pub async fn resend_registration_sms(&self, token: &str) -> Result<(), ServiceError> {
        self.resend_code(token, AttemptKind::Registration).await
    }

    /// Whether the registration attempt has been confirmed out-of-band.
    pub fn registration_confirmed(&self, token: &str) -> Result<bool, ServiceError> {
        self.attempts.is_confirmed(token)
    }

    /// Complete a fully-confirmed attempt: releases the token and hands
    /// back the principal for session establishment.
    pub fn complete_attempt(&self, token: &str) -> Result<String, ServiceError> {
        let (username, _) = self.attempts.complete(token)?;
        Ok(username)
    }

    /// Begin a login with the primary factor. Unknown users and wrong
    /// passwords are indistinguishable to the caller.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginStart, ServiceError> {
        let user = self
            .store
            .get_user(username)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;
        if !user.is_active() {
            return Err(ServiceError::InvalidCredentials);
        }
        let hash = user
            .password_hash
            .as_deref()
            .ok_or(ServiceError::InvalidCredentials)?;
        verify_password(
            &Password::new(password.to_string()),
            &PasswordHashString::new(hash.to_string()),
        )
        .map_err(|_| ServiceError::InvalidCredentials)?;

        let factors = required_factors(user.has_totp(), user.verified_phonenumber().is_some());
        if factors.is_empty() {
            tracing::info!(username = %username, "Login authenticated, no second factor");
            return Ok(LoginStart {
                token: None,
                state: FlowState::Authenticated,
                delivery_failed: false,
            });
        }

        let state = pending_state(&factors);
        let token = self
            .attempts
            .begin(username.to_string(), AttemptKind::Login, factors);

        let mut delivery_failed = false;
        if state == FlowState::SmsPending {
            let issued = self.attempts.issue_code(&token)?;
            let phone = user.verified_phonenumber().ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("SMS step pending without a verified phone"))
            })?;
            delivery_failed = self.deliver(&phone.phonenumber, &issued).await?;
        }

        Ok(LoginStart {
            token: Some(token),
            state,
            delivery_failed,
        })
    }

    /// Submit the TOTP step. The code is validated against the user's
    /// secret; advancing the attempt is single-winner.
    pub async fn submit_totp(&self, token: &str, code: &str) -> Result<StepOutcome, ServiceError> {
        let attempt = self.attempts.get(token)?;
        if attempt.kind != AttemptKind::Login {
            return Err(ServiceError::AttemptNotFound);
        }
        if attempt.current_step() != Some(Factor::Totp) {
            return Err(ServiceError::AttemptAlreadyAdvanced);
        }

        let user = self
            .store
            .get_user(&attempt.username)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        let secret = user.totp_secret.as_deref().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("TOTP step pending without a secret"))
        })?;
        let valid = totp::validate_code(secret, code, chrono::Utc::now().timestamp())?;

        let outcome = self.attempts.submit_totp(token, valid)?;
        if let StepOutcome::Next {
            factor: Factor::Sms,
        } = outcome
        {
            let issued = self.attempts.issue_code(token)?;
            self.send_to_verified_phone(&user, &issued).await?;
        }
        Ok(outcome)
    }

    /// Submit the SMS second-factor code.
    pub async fn submit_login_sms(
        &self,
        token: &str,
        code: &str,
    ) -> Result<StepOutcome, ServiceError> {
        let attempt = self.attempts.get(token)?;
        if attempt.kind != AttemptKind::Login {
            return Err(ServiceError::AttemptNotFound);
        }
        self.attempts.submit_code(token, code)
    }

    pub async fn resend_login_sms(&self, token: &str) -> Result<(), ServiceError> {
        self.resend_code(token, AttemptKind::Login).await
    }

    pub fn login_confirmed(&self, token: &str) -> Result<bool, ServiceError> {
        self.attempts.is_confirmed(token)
    }

    /// Cancel an in-flight attempt; the token is released immediately.
    pub fn cancel(&self, token: &str) -> Result<(), ServiceError> {
        self.attempts.cancel(token)
    }

    /// Consume an "external identity verified, username=X" event from a
    /// login callback. Finds or creates the bound user; the external
    /// provider already verified the identity, so the account is active.
    pub async fn external_login(
        &self,
        provider: &str,
        external_username: &str,
    ) -> Result<String, ServiceError> {
        let username = external_username.to_lowercase();
        match self.store.get_user(&username).await? {
            Some(mut user) => {
                if !user.has_external_identity(provider, external_username) {
                    user.external_identities.push(ExternalIdentity {
                        provider: provider.to_string(),
                        username: external_username.to_string(),
                    });
                    self.store.update_user(&user).await?;
                }
                if !user.is_active() {
                    self.activate_user(&username).await?;
                }
            }
            None => {
                let mut user = User::new(username.clone());
                validate_user(&user)?;
                user.status = UserStatus::Active;
                user.external_identities.push(ExternalIdentity {
                    provider: provider.to_string(),
                    username: external_username.to_string(),
                });
                self.store.insert_user(&user).await?;
                tracing::info!(username = %username, provider = %provider, "User created from external identity");
            }
        }
        Ok(username)
    }

    /// Enable TOTP 2FA for a user; returns the enrollment secret.
    pub async fn enable_totp(&self, username: &str) -> Result<String, ServiceError> {
        let mut user = self
            .store
            .get_user(username)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        let secret = totp::generate_secret();
        user.totp_secret = Some(secret.clone());
        self.store.update_user(&user).await?;
        Ok(secret)
    }

    async fn activate_user(&self, username: &str) -> Result<(), ServiceError> {
        let mut user = self
            .store
            .get_user(username)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        for phone in &mut user.phonenumbers {
            phone.verified = true;
        }
        user.status = UserStatus::Active;
        self.store.update_user(&user).await?;
        tracing::info!(username = %username, "User activated");
        Ok(())
    }

    async fn resend_code(&self, token: &str, kind: AttemptKind) -> Result<(), ServiceError> {
        let attempt = self.attempts.get(token)?;
        if attempt.kind != kind {
            return Err(ServiceError::AttemptNotFound);
        }
        let user = self
            .store
            .get_user(&attempt.username)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        let issued = self.attempts.issue_code(token)?;
        match kind {
            AttemptKind::Registration => {
                let phone = user
                    .phonenumbers
                    .first()
                    .ok_or(ServiceError::UserNotFound)?;
                self.sms
                    .send_confirmation_code(&phone.phonenumber, &issued.code, &issued.link_key)
                    .await
            }
            AttemptKind::Login => self.send_to_verified_phone(&user, &issued).await,
        }
    }

    /// Send, reporting delivery trouble on the start struct instead of
    /// failing the flow: the attempt stays alive and the caller keeps
    /// the token, so the resend endpoints remain reachable.
    async fn deliver(
        &self,
        phonenumber: &str,
        issued: &IssuedCode,
    ) -> Result<bool, ServiceError> {
        match self
            .sms
            .send_confirmation_code(phonenumber, &issued.code, &issued.link_key)
            .await
        {
            Ok(()) => Ok(false),
            Err(ServiceError::DeliveryFailure(reason)) => {
                tracing::warn!(reason = %reason, "Confirmation SMS not delivered, resend available");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn send_to_verified_phone(
        &self,
        user: &User,
        issued: &IssuedCode,
    ) -> Result<(), ServiceError> {
        let phone = user.verified_phonenumber().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("SMS step pending without a verified phone"))
        })?;
        self.sms
            .send_confirmation_code(&phone.phonenumber, &issued.code, &issued.link_key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttemptConfig;
    use crate::services::{MemoryStore, MockSmsService};

    fn setup() -> (Arc<MemoryStore>, Arc<MockSmsService>, IdentityService) {
        let store = Arc::new(MemoryStore::new());
        let sms = Arc::new(MockSmsService::new());
        let attempts = Arc::new(AttemptService::new(&AttemptConfig {
            attempt_lifetime_seconds: 600,
            sms_code_lifetime_seconds: 300,
            max_code_retries: 3,
        }));
        let service = IdentityService::new(store.clone(), attempts, sms.clone());
        (store, sms, service)
    }

    #[tokio::test]
    async fn registration_requires_phone_confirmation_before_active() {
        let (store, sms, service) = setup();

        let token = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap()
            .token;

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Unconfirmed);

        let code = sms.last_code().unwrap();
        let username = service.confirm_registration(&token, &code).await.unwrap();
        assert_eq!(username, "alice");

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.verified_phonenumber().is_some());
    }

    #[tokio::test]
    async fn registering_an_active_username_is_rejected() {
        let (_, sms, service) = setup();
        let token = service
            .register("alice", "pw", "+3212345678")
            .await
            .unwrap()
            .token;
        let code = sms.last_code().unwrap();
        service.confirm_registration(&token, &code).await.unwrap();

        assert!(matches!(
            service.register("alice", "pw", "+3212345678").await,
            Err(ServiceError::UserAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn abandoned_registration_does_not_burn_the_username() {
        let (_, sms, service) = setup();
        let token = service
            .register("alice", "first try", "+3212345678")
            .await
            .unwrap()
            .token;

        // Exhaust the retry budget; the attempt is released.
        for _ in 0..3 {
            assert!(matches!(
                service.confirm_registration(&token, "000000").await,
                Err(ServiceError::InvalidCode)
            ));
        }
        assert!(matches!(
            service.confirm_registration(&token, "000000").await,
            Err(ServiceError::AttemptNotFound)
        ));

        // The unconfirmed record does not block a fresh registration.
        let token = service
            .register("alice", "second try", "+3212345678")
            .await
            .unwrap()
            .token;
        let code = sms.last_code().unwrap();
        service.confirm_registration(&token, &code).await.unwrap();

        let start = service.login("alice", "second try").await.unwrap();
        assert_eq!(start.state, FlowState::SmsPending);
    }

    #[tokio::test]
    async fn unconfirmed_user_cannot_log_in() {
        let (_, _, service) = setup();
        service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap();
        assert!(matches!(
            service.login("alice", "correct horse").await,
            Err(ServiceError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn login_with_sms_factor_goes_through_sms_pending() {
        let (_, sms, service) = setup();
        let token = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap()
            .token;
        let code = sms.last_code().unwrap();
        service.confirm_registration(&token, &code).await.unwrap();

        let start = service.login("alice", "correct horse").await.unwrap();
        assert_eq!(start.state, FlowState::SmsPending);
        let token = start.token.unwrap();

        let code = sms.last_code().unwrap();
        let outcome = service.submit_login_sms(&token, &code).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Authenticated {
                username: "alice".to_string(),
                kind: AttemptKind::Login
            }
        );
    }

    #[tokio::test]
    async fn totp_user_never_authenticates_without_the_totp_step() {
        let (store, sms, service) = setup();
        let token = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap()
            .token;
        let code = sms.last_code().unwrap();
        service.confirm_registration(&token, &code).await.unwrap();
        let secret = service.enable_totp("alice").await.unwrap();

        let start = service.login("alice", "correct horse").await.unwrap();
        assert_eq!(start.state, FlowState::TotpPending);
        let token = start.token.unwrap();

        // The SMS endpoint cannot advance a TOTP-pending attempt.
        assert!(matches!(
            service.submit_login_sms(&token, "123456").await,
            Err(ServiceError::AttemptAlreadyAdvanced)
        ));

        let code = totp::current_code(&secret, chrono::Utc::now().timestamp()).unwrap();
        let outcome = service.submit_totp(&token, &code).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Authenticated {
                username: "alice".to_string(),
                kind: AttemptKind::Login
            }
        );

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert!(user.has_totp());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_indistinguishable() {
        let (_, sms, service) = setup();
        let token = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap()
            .token;
        let code = sms.last_code().unwrap();
        service.confirm_registration(&token, &code).await.unwrap();

        let wrong = service.login("alice", "wrong").await;
        let unknown = service.login("nobody", "wrong").await;
        assert!(matches!(wrong, Err(ServiceError::InvalidCredentials)));
        assert!(matches!(unknown, Err(ServiceError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn delivery_failure_surfaces_the_token_for_resend() {
        let (_, sms, service) = setup();
        let token = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap()
            .token;
        let code = sms.last_code().unwrap();
        service.confirm_registration(&token, &code).await.unwrap();

        sms.fail_next_delivery();
        let start = service.login("alice", "correct horse").await.unwrap();
        assert!(start.delivery_failed);
        assert_eq!(start.state, FlowState::SmsPending);
        let token = start.token.unwrap();

        // The gateway recovered; resend goes out and finishes the flow.
        service.resend_login_sms(&token).await.unwrap();
        let code = sms.last_code().unwrap();
        let outcome = service.submit_login_sms(&token, &code).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Authenticated { .. }));
    }

    #[tokio::test]
    async fn registration_delivery_failure_is_flagged_not_fatal() {
        let (_, sms, service) = setup();
        sms.fail_next_delivery();
        let start = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap();
        assert!(start.delivery_failed);

        service.resend_registration_sms(&start.token).await.unwrap();
        let code = sms.last_code().unwrap();
        let username = service
            .confirm_registration(&start.token, &code)
            .await
            .unwrap();
        assert_eq!(username, "alice");
    }

    #[tokio::test]
    async fn external_login_creates_active_bound_user() {
        let (store, _, service) = setup();
        let username = service.external_login("github", "Alice").await.unwrap();
        assert_eq!(username, "alice");

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert!(user.is_active());
        assert!(user.has_external_identity("github", "Alice"));

        // Idempotent for the same binding.
        let again = service.external_login("github", "Alice").await.unwrap();
        assert_eq!(again, "alice");
    }

    #[tokio::test]
    async fn out_of_band_link_confirms_and_poll_completes() {
        let (store, sms, service) = setup();
        let token = service
            .register("alice", "correct horse", "+3212345678")
            .await
            .unwrap()
            .token;
        assert!(!service.registration_confirmed(&token).unwrap());

        let key = sms.last_link_key().unwrap();
        service.confirm_phone_link(&key).await.unwrap();

        assert!(service.registration_confirmed(&token).unwrap());
        let user = store.get_user("alice").await.unwrap().unwrap();
        assert!(user.is_active());

        let username = service.complete_attempt(&token).unwrap();
        assert_eq!(username, "alice");
        // The token is single-use for completion as well.
        assert!(matches!(
            service.complete_attempt(&token),
            Err(ServiceError::AttemptNotFound)
        ));
    }
}
