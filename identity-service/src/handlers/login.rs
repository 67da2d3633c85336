//! Login flow: primary factor, second-factor confirmation, logout.

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use service_core::error::AppError;

use crate::dtos::auth::{
    AttemptTokenQuery, AttemptTokenRequest, ConfirmedResponse, FlowResponse, LoginRequest,
    MessageResponse, SmsConfirmationRequest, TotpConfirmationRequest, TotpSetupResponse,
};
use crate::handlers::{establish_session_cookie, next_for_outcome, next_for_state};
use crate::middleware::LoggedInUser;
use crate::services::{FlowState, SessionType, StepOutcome};
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    let start = state.identity.login(&req.username, &req.password).await?;

    if start.state == FlowState::Authenticated {
        let cookie = establish_session_cookie(&state, SessionType::Normal, &req.username)?;
        return Ok((
            jar.add(cookie),
            Json(FlowResponse {
                token: None,
                next: next_for_state(FlowState::Authenticated).to_string(),
                delivery_failed: false,
            }),
        ));
    }

    Ok((
        jar,
        Json(FlowResponse {
            token: start.token,
            next: next_for_state(start.state).to_string(),
            delivery_failed: start.delivery_failed,
        }),
    ))
}

/// GET /logintotpconfirmation
pub async fn totp_confirmation_info(
    State(state): State<AppState>,
    Query(query): Query<AttemptTokenQuery>,
) -> Result<Json<FlowResponse>, AppError> {
    let attempt = state.attempts.get(&query.token)?;
    Ok(Json(FlowResponse {
        token: Some(attempt.token),
        next: next_for_state(crate::services::pending_state(&attempt.remaining)).to_string(),
        delivery_failed: false,
    }))
}

/// POST /logintotpconfirmation
pub async fn confirm_totp(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<TotpConfirmationRequest>,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    let outcome = state.identity.submit_totp(&req.token, &req.totpcode).await?;
    respond_with_outcome(&state, jar, &req.token, outcome)
}

/// GET /loginsmsconfirmation
pub async fn sms_confirmation_info(
    State(state): State<AppState>,
    Query(query): Query<AttemptTokenQuery>,
) -> Result<Json<FlowResponse>, AppError> {
    let attempt = state.attempts.get(&query.token)?;
    Ok(Json(FlowResponse {
        token: Some(attempt.token),
        next: next_for_state(crate::services::pending_state(&attempt.remaining)).to_string(),
        delivery_failed: false,
    }))
}

/// POST /loginsmsconfirmation
pub async fn confirm_sms(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SmsConfirmationRequest>,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    let outcome = state
        .identity
        .submit_login_sms(&req.token, &req.smscode)
        .await?;
    respond_with_outcome(&state, jar, &req.token, outcome)
}

/// POST /loginresendsms
pub async fn resend_sms(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AttemptTokenRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.identity.resend_login_sms(&req.token).await?;
    Ok(Json(MessageResponse {
        message: "Confirmation code sent".to_string(),
    }))
}

/// GET /loginsmsconfirmed
///
/// Polling endpoint for the out-of-band SMS link during login.
pub async fn sms_confirmed(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<AttemptTokenQuery>,
) -> Result<(CookieJar, Json<ConfirmedResponse>), AppError> {
    if !state.identity.login_confirmed(&query.token)? {
        return Ok((jar, Json(ConfirmedResponse { confirmed: false })));
    }

    let username = state.identity.complete_attempt(&query.token)?;
    let cookie = establish_session_cookie(&state, SessionType::Normal, &username)?;
    Ok((jar.add(cookie), Json(ConfirmedResponse { confirmed: true })))
}

/// POST /logincancel
pub async fn cancel(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AttemptTokenRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.identity.cancel(&req.token)?;
    Ok(Json(MessageResponse {
        message: "Login cancelled".to_string(),
    }))
}

/// GET /logout
///
/// Invalidates every session the request presents. Each cookie only
/// unlocks the store of its own session type.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    let mut jar = jar;
    for &session_type in SessionType::ALL.iter() {
        if let Some(cookie) = jar.get(session_type.cookie_name()) {
            let value = cookie.value().to_string();
            state.sessions.invalidate(session_type, Some(&value));
            jar = jar.remove(axum_extra::extract::cookie::Cookie::from(
                session_type.cookie_name(),
            ));
        }
    }
    (
        jar,
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    )
}

/// POST /totp/setup
///
/// Enable the TOTP factor for the logged-in user. The secret is shown
/// exactly once; subsequent logins require the code.
pub async fn totp_setup(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
) -> Result<Json<TotpSetupResponse>, AppError> {
    let secret = state.identity.enable_totp(&user.username).await?;
    Ok(Json(TotpSetupResponse { totpsecret: secret }))
}

fn respond_with_outcome(
    state: &AppState,
    jar: CookieJar,
    token: &str,
    outcome: StepOutcome,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    let next = next_for_outcome(&outcome).to_string();
    match outcome {
        StepOutcome::Authenticated { username, .. } => {
            let cookie = establish_session_cookie(state, SessionType::Normal, &username)?;
            Ok((
                jar.add(cookie),
                Json(FlowResponse {
                    token: None,
                    next,
                    delivery_failed: false,
                }),
            ))
        }
        StepOutcome::Next { .. } => Ok((
            jar,
            Json(FlowResponse {
                token: Some(token.to_string()),
                next,
                delivery_failed: false,
            }),
        )),
    }
}
