//! The logged-in user's own profile.

use axum::{extract::State, Json};

use service_core::error::AppError;

use crate::middleware::LoggedInUser;
use crate::models::SanitizedUser;
use crate::services::ServiceError;
use crate::AppState;

/// GET /users/me
pub async fn get_me(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
) -> Result<Json<SanitizedUser>, AppError> {
    let record = state
        .store
        .get_user(&user.username)
        .await?
        .ok_or(ServiceError::UserNotFound)?;
    Ok(Json(record.sanitized()))
}
