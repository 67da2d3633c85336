use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 150, message = "Username must be 2 to 150 characters"))]
    pub username: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(min = 6, message = "Phone number is required"))]
    pub phonenumber: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TotpConfirmationRequest {
    #[validate(length(min = 1, message = "Attempt token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "TOTP code is required"))]
    pub totpcode: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SmsConfirmationRequest {
    #[validate(length(min = 1, message = "Attempt token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "SMS code is required"))]
    pub smscode: String,
}

/// A request that only identifies the attempt (resend, cancel).
#[derive(Debug, Deserialize, Validate)]
pub struct AttemptTokenRequest {
    #[validate(length(min = 1, message = "Attempt token is required"))]
    pub token: String,
}

/// Query parameters of polling endpoints.
#[derive(Debug, Deserialize)]
pub struct AttemptTokenQuery {
    pub token: String,
}

/// Query parameters of the out-of-band confirmation link.
#[derive(Debug, Deserialize)]
pub struct ConfirmationLinkQuery {
    /// The long single-use key from the SMS link, not the short code.
    pub key: String,
}

/// Where the client should navigate next, plus the attempt token it
/// must carry through the remaining steps.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlowResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub next: String,
    /// Set when the confirmation SMS could not be delivered; the step
    /// can be retried through the resend endpoint with the same token.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delivery_failed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmedResponse {
    pub confirmed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Query parameters of `GET /authorize`. Scopes travel as a
/// comma-separated list.
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    /// Target organization; absent for a plain profile grant.
    pub organization: Option<String>,

    #[serde(default)]
    pub scopes: String,

    /// Requested validity in seconds; clamped server-side.
    pub validity_seconds: Option<i64>,
}

impl AuthorizeQuery {
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GrantResponse {
    pub token: String,
    pub grant_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeGrantRequest {
    #[validate(length(min = 1, message = "Grant id is required"))]
    pub grant_id: String,
}

#[derive(Debug, Serialize)]
pub struct TotpSetupResponse {
    pub totpsecret: String,
}

/// Callback query from an external identity provider.
#[derive(Debug, Deserialize)]
pub struct ExternalCallbackQuery {
    pub code: String,
    #[serde(default)]
    pub state: String,
}
