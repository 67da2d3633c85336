//! HTTP boundary. Handlers translate between JSON requests and the
//! services layer; flow responses carry a `next` navigation identifier
//! so clients know which step follows.

pub mod authorize;
pub mod login;
pub mod organization;
pub mod registration;
pub mod social;
pub mod user;

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::services::{FlowState, ServiceError, SessionType, StepOutcome};
use crate::AppState;

/// Navigation identifiers handed to clients.
pub(crate) const NEXT_AUTHENTICATED: &str = "authenticated";
pub(crate) const NEXT_TOTP: &str = "totpconfirmation";
pub(crate) const NEXT_SMS: &str = "smsconfirmation";
pub(crate) const NEXT_PHONE: &str = "phoneconfirmation";

pub(crate) fn next_for_state(state: FlowState) -> &'static str {
    match state {
        FlowState::TotpPending => NEXT_TOTP,
        FlowState::SmsPending => NEXT_SMS,
        FlowState::PhoneConfirmationPending => NEXT_PHONE,
        FlowState::Authenticated => NEXT_AUTHENTICATED,
        _ => "restart",
    }
}

pub(crate) fn next_for_outcome(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Authenticated { .. } => NEXT_AUTHENTICATED,
        StepOutcome::Next { factor } => next_for_state(crate::services::pending_state(
            std::slice::from_ref(factor),
        )),
    }
}

/// Build the session cookie for a freshly authenticated principal.
/// Lifetime is enforced server-side; the cookie itself is a session
/// cookie.
pub(crate) fn establish_session_cookie(
    state: &AppState,
    session_type: SessionType,
    username: &str,
) -> Result<Cookie<'static>, ServiceError> {
    let value = state.sessions.establish(session_type, username)?;
    let mut cookie = Cookie::new(session_type.cookie_name(), value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    Ok(cookie)
}
