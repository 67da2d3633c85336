//! Outbound SMS delivery capability.
//!
//! The transport is an external collaborator; this service only needs to
//! hand a confirmation code and its out-of-band link key to a provider
//! and treat failures as retryable. The mock implementation records
//! deliveries for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::services::ServiceError;

#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Deliver a confirmation message to a phone number: the short code
    /// typed back in-band and the link key embedded in the confirmation
    /// URL. Errors surface as [`ServiceError::DeliveryFailure`] and
    /// never advance attempt state.
    async fn send_confirmation_code(
        &self,
        phonenumber: &str,
        code: &str,
        link_key: &str,
    ) -> Result<(), ServiceError>;
}

/// Provider that writes codes to the log instead of a gateway. Used
/// when no gateway is configured; a real transport implements
/// [`SmsProvider`] against the operator's gateway of choice.
#[derive(Default)]
pub struct LogSmsProvider;

impl LogSmsProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SmsProvider for LogSmsProvider {
    async fn send_confirmation_code(
        &self,
        phonenumber: &str,
        code: &str,
        link_key: &str,
    ) -> Result<(), ServiceError> {
        tracing::info!(
            phonenumber = %phonenumber,
            code = %code,
            link_key = %link_key,
            "SMS confirmation code (log delivery)"
        );
        Ok(())
    }
}

/// Delivery recorded by [`MockSmsService`].
#[derive(Debug, Clone)]
pub struct SentSms {
    pub phonenumber: String,
    pub code: String,
    pub link_key: String,
}

/// In-process provider for tests and local development.
#[derive(Default)]
pub struct MockSmsService {
    pub sent: Mutex<Vec<SentSms>>,
    pub fail_next: Mutex<bool>,
}

impl MockSmsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently delivered code, if any.
    pub fn last_code(&self) -> Option<String> {
        self.sent
            .lock()
            .ok()
            .and_then(|sent| sent.last().map(|s| s.code.clone()))
    }

    /// The link key of the most recent delivery, if any.
    pub fn last_link_key(&self) -> Option<String> {
        self.sent
            .lock()
            .ok()
            .and_then(|sent| sent.last().map(|s| s.link_key.clone()))
    }

    /// Make the next delivery fail, to exercise the retryable path.
    pub fn fail_next_delivery(&self) {
        if let Ok(mut flag) = self.fail_next.lock() {
            *flag = true;
        }
    }
}

#[async_trait]
impl SmsProvider for MockSmsService {
    async fn send_confirmation_code(
        &self,
        phonenumber: &str,
        code: &str,
        link_key: &str,
    ) -> Result<(), ServiceError> {
        {
            let mut flag = self.fail_next.lock().map_err(|e| {
                ServiceError::Internal(anyhow::anyhow!("mock sms mutex poisoned: {}", e))
            })?;
            if *flag {
                *flag = false;
                return Err(ServiceError::DeliveryFailure(
                    "sms gateway unavailable".to_string(),
                ));
            }
        }

        tracing::debug!(phonenumber = %phonenumber, "Mock SMS delivery");
        self.sent
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("mock sms mutex poisoned: {}", e)))?
            .push(SentSms {
                phonenumber: phonenumber.to_string(),
                code: code.to_string(),
                link_key: link_key.to_string(),
            });
        Ok(())
    }
}
