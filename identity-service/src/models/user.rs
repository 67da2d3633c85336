//! User model - identity records keyed by username.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{ValidationError, ValidationErrors};

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9\-_]{2,150}$").expect("username regex is valid"));

/// Account lifecycle. Users are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Created at registration-start; required confirmations outstanding.
    Unconfirmed,
    Active,
    Deactivated,
}

/// A labeled phone number. Only verified numbers count for SMS 2FA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phonenumber {
    pub label: String,
    pub phonenumber: String,
    pub verified: bool,
}

/// A verified external-login binding, e.g. provider `github`,
/// username `alice`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub provider: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Primary key, unique.
    #[serde(rename = "_id")]
    pub username: String,

    #[serde(default)]
    pub phonenumbers: Vec<Phonenumber>,

    /// Base64-encoded shared secret; present iff TOTP 2FA is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,

    #[serde(default)]
    pub external_identities: Vec<ExternalIdentity>,

    /// Argon2 PHC string; absent until the primary credential is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    pub status: UserStatus,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String) -> Self {
        Self {
            username,
            phonenumbers: Vec::new(),
            totp_secret: None,
            external_identities: Vec::new(),
            password_hash: None,
            status: UserStatus::Unconfirmed,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn has_totp(&self) -> bool {
        self.totp_secret.is_some()
    }

    /// The first verified phone number, if any. Presence of one means SMS
    /// 2FA is configured for login.
    pub fn verified_phonenumber(&self) -> Option<&Phonenumber> {
        self.phonenumbers.iter().find(|p| p.verified)
    }

    pub fn has_external_identity(&self, provider: &str, username: &str) -> bool {
        self.external_identities
            .iter()
            .any(|e| e.provider == provider && e.username == username)
    }

    /// Response form without credential material.
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser {
            username: self.username.clone(),
            phonenumbers: self.phonenumbers.clone(),
            totp_enabled: self.has_totp(),
            external_identities: self.external_identities.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// User as exposed over the API: no password hash, no TOTP secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedUser {
    pub username: String,
    pub phonenumbers: Vec<Phonenumber>,
    pub totp_enabled: bool,
    pub external_identities: Vec<ExternalIdentity>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

/// Validate a user record before persistence.
pub fn validate_user(user: &User) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if !USERNAME_RE.is_match(&user.username) {
        let mut err = ValidationError::new("pattern");
        err.message =
            Some("username must be 2-150 characters of lowercase letters, digits, - or _".into());
        errors.add("username", err);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
