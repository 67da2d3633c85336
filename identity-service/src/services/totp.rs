//! Time-based one-time passwords (RFC 6238) over HMAC-SHA256.
//!
//! Secrets are stored base64-encoded on the user record. Validation
//! accepts one time-step of clock skew in either direction and compares
//! codes in constant time.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::services::ServiceError;

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 6;
const SKEW_STEPS: i64 = 1;

/// Generate a fresh base64-encoded TOTP secret for enrollment.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Validate a submitted code against a stored secret, allowing ±1 step.
pub fn validate_code(secret_b64: &str, code: &str, unix_now: i64) -> Result<bool, ServiceError> {
    let secret = BASE64
        .decode(secret_b64)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("malformed TOTP secret: {}", e)))?;

    let current_step = unix_now / STEP_SECONDS as i64;
    for offset in -SKEW_STEPS..=SKEW_STEPS {
        let step = current_step + offset;
        if step < 0 {
            continue;
        }
        let expected = hotp(&secret, step as u64)?;
        if expected.as_bytes().ct_eq(code.as_bytes()).into() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Current code for a secret; used by enrollment flows and tests.
pub fn current_code(secret_b64: &str, unix_now: i64) -> Result<String, ServiceError> {
    let secret = BASE64
        .decode(secret_b64)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("malformed TOTP secret: {}", e)))?;
    hotp(&secret, (unix_now / STEP_SECONDS as i64) as u64)
}

fn hotp(secret: &[u8], counter: u64) -> Result<String, ServiceError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("bad TOTP key length: {}", e)))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation per RFC 4226 §5.3.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);
    let code = binary % 10u32.pow(DIGITS);
    Ok(format!("{:0width$}", code, width = DIGITS as usize))
}
