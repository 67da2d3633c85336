//! Registration flow: create the account, confirm the phone number,
//! establish the first session.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use service_core::error::AppError;

use crate::dtos::auth::{
    AttemptTokenQuery, AttemptTokenRequest, ConfirmationLinkQuery, ConfirmedResponse,
    FlowResponse, MessageResponse, RegisterRequest, SmsConfirmationRequest,
};
use crate::handlers::{establish_session_cookie, NEXT_AUTHENTICATED, NEXT_SMS};
use crate::services::SessionType;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<FlowResponse>), AppError> {
    let start = state
        .identity
        .register(&req.username, &req.password, &req.phonenumber)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(FlowResponse {
            token: Some(start.token),
            next: NEXT_SMS.to_string(),
            delivery_failed: start.delivery_failed,
        }),
    ))
}

/// GET /registersmsconfirmation
pub async fn sms_confirmation_info(
    State(state): State<AppState>,
    Query(query): Query<AttemptTokenQuery>,
) -> Result<Json<FlowResponse>, AppError> {
    let attempt = state.attempts.get(&query.token)?;
    Ok(Json(FlowResponse {
        token: Some(attempt.token),
        next: NEXT_SMS.to_string(),
        delivery_failed: false,
    }))
}

/// POST /registersmsconfirmation
pub async fn confirm_sms(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SmsConfirmationRequest>,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    let username = state
        .identity
        .confirm_registration(&req.token, &req.smscode)
        .await?;

    let cookie = establish_session_cookie(&state, SessionType::Normal, &username)?;
    Ok((
        jar.add(cookie),
        Json(FlowResponse {
            token: None,
            next: NEXT_AUTHENTICATED.to_string(),
            delivery_failed: false,
        }),
    ))
}

/// POST /registerresendsms
pub async fn resend_sms(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AttemptTokenRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.identity.resend_registration_sms(&req.token).await?;
    Ok(Json(MessageResponse {
        message: "Confirmation code sent".to_string(),
    }))
}

/// GET /registrationsmsconfirmed
///
/// Polling endpoint for the out-of-band link. Once the link has been
/// clicked, the first poll wins the attempt and gets the session.
pub async fn sms_confirmed(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<AttemptTokenQuery>,
) -> Result<(CookieJar, Json<ConfirmedResponse>), AppError> {
    if !state.identity.registration_confirmed(&query.token)? {
        return Ok((jar, Json(ConfirmedResponse { confirmed: false })));
    }

    let username = state.identity.complete_attempt(&query.token)?;
    let cookie = establish_session_cookie(&state, SessionType::Normal, &username)?;
    Ok((jar.add(cookie), Json(ConfirmedResponse { confirmed: true })))
}

/// GET /phonevalidation
///
/// The link sent alongside the SMS code, carrying its own long
/// single-use key. A second click finds nothing.
pub async fn phone_validation(
    State(state): State<AppState>,
    Query(query): Query<ConfirmationLinkQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    state.identity.confirm_phone_link(&query.key).await?;
    Ok(Json(MessageResponse {
        message: "Phone number confirmed".to_string(),
    }))
}

