//! Grant issuance and revocation. Both require a live session.

use axum::{
    extract::{Query, State},
    Json,
};

use service_core::error::AppError;

use crate::dtos::auth::{AuthorizeQuery, GrantResponse, MessageResponse, RevokeGrantRequest};
use crate::middleware::LoggedInUser;
use crate::services::GrantRequest;
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /authorize
pub async fn authorize(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<GrantResponse>, AppError> {
    let grant = state
        .grants
        .authorize(
            Some(&user.username),
            GrantRequest {
                organization: query.organization.clone(),
                scopes: query.scope_list(),
                requested_ttl_seconds: query.validity_seconds,
            },
        )
        .await?;

    Ok(Json(GrantResponse {
        token: grant.token,
        grant_id: grant.grant_id,
        expires_at: grant.expires_at,
    }))
}

/// POST /authorize/revoke
pub async fn revoke(
    State(state): State<AppState>,
    LoggedInUser(_user): LoggedInUser,
    ValidatedJson(req): ValidatedJson<RevokeGrantRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.grants.revoke(&req.grant_id).await?;
    Ok(Json(MessageResponse {
        message: "Grant revoked".to_string(),
    }))
}
