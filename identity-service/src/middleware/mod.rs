//! Session authentication middleware and the logged-in-user extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use crate::dtos::ErrorResponse;
use crate::services::SessionType;
use crate::AppState;

/// The principal resolved from a session cookie, stored in request
/// extensions by [`session_auth_middleware`].
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub username: String,
    pub session_type: SessionType,
}

/// Require a live session of any type. Each cookie name is checked
/// against its own store; a cookie never unlocks a sibling type.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let resolved = SessionType::ALL.iter().find_map(|&session_type| {
        let cookie = jar.get(session_type.cookie_name()).map(|c| c.value());
        state
            .sessions
            .current_user(session_type, cookie)
            .map(|username| SessionUser {
                username,
                session_type,
            })
    });

    match resolved {
        Some(user) => {
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Not logged in".to_string(),
            }),
        )),
    }
}

/// Extractor for the principal behind the protected route.
pub struct LoggedInUser(pub SessionUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for LoggedInUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<SessionUser>().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Session principal missing from request extensions".to_string(),
            }),
        ))?;

        Ok(LoggedInUser(user.clone()))
    }
}
