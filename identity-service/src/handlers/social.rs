//! External identity callbacks. The provider handshake itself happens
//! upstream; by the time the callback lands here the identity is
//! considered verified and the code parameter names the external user.

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use service_core::error::AppError;

use crate::dtos::auth::{ExternalCallbackQuery, FlowResponse};
use crate::handlers::{establish_session_cookie, NEXT_AUTHENTICATED};
use crate::services::SessionType;
use crate::AppState;

/// GET /github_callback
pub async fn github_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ExternalCallbackQuery>,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    external_callback(state, jar, "github", &query.code).await
}

/// GET /facebook_callback
pub async fn facebook_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ExternalCallbackQuery>,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    external_callback(state, jar, "facebook", &query.code).await
}

async fn external_callback(
    state: AppState,
    jar: CookieJar,
    provider: &str,
    external_username: &str,
) -> Result<(CookieJar, Json<FlowResponse>), AppError> {
    let username = state
        .identity
        .external_login(provider, external_username)
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
