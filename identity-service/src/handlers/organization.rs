//! Organization management API. Every route requires a live session;
//! ownership checks happen in the service against the delegation graph.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use service_core::error::AppError;

use crate::dtos::organization::{
    CreateOrganizationRequest, CreateSubOrganizationRequest, OrgEdgeRequest,
    OrganizationResponse, RosterRequest,
};
use crate::middleware::LoggedInUser;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /organizations
pub async fn create(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    ValidatedJson(req): ValidatedJson<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationResponse>), AppError> {
    let org = state
        .organizations
        .create(&user.username, &req.globalid, req.secondsvalidity)
        .await?;
    Ok((StatusCode::CREATED, Json(org.into())))
}

/// GET /organizations/:globalid
pub async fn get(
    State(state): State<AppState>,
    LoggedInUser(_user): LoggedInUser,
    Path(globalid): Path<String>,
) -> Result<Json<OrganizationResponse>, AppError> {
    let org = state.organizations.get(&globalid).await?;
    Ok(Json(org.into()))
}

/// POST /organizations/:globalid/suborganizations
pub async fn create_sub(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path(globalid): Path<String>,
    ValidatedJson(req): ValidatedJson<CreateSubOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationResponse>), AppError> {
    let org = state
        .organizations
        .create_sub(&user.username, &globalid, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(org.into())))
}

/// POST /organizations/:globalid/owners
pub async fn add_owner(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path(globalid): Path<String>,
    ValidatedJson(req): ValidatedJson<RosterRequest>,
) -> Result<Json<OrganizationResponse>, AppError> {
    let org = state
        .organizations
        .add_owner(&user.username, &globalid, &req.username)
        .await?;
    Ok(Json(org.into()))
}

/// DELETE /organizations/:globalid/owners/:username
pub async fn remove_owner(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path((globalid, username)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .organizations
        .remove_owner(&user.username, &globalid, &username)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /organizations/:globalid/members
pub async fn add_member(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path(globalid): Path<String>,
    ValidatedJson(req): ValidatedJson<RosterRequest>,
) -> Result<Json<OrganizationResponse>, AppError> {
    let org = state
        .organizations
        .add_member(&user.username, &globalid, &req.username)
        .await?;
    Ok(Json(org.into()))
}

/// DELETE /organizations/:globalid/members/:username
pub async fn remove_member(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path((globalid, username)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .organizations
        .remove_member(&user.username, &globalid, &username)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /organizations/:globalid/orgowners
pub async fn add_org_owner(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path(globalid): Path<String>,
    ValidatedJson(req): ValidatedJson<OrgEdgeRequest>,
) -> Result<Json<OrganizationResponse>, AppError> {
    let org = state
        .organizations
        .add_org_owner(&user.username, &globalid, &req.globalid)
        .await?;
    Ok(Json(org.into()))
}

/// POST /organizations/:globalid/orgmembers
pub async fn add_org_member(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path(globalid): Path<String>,
    ValidatedJson(req): ValidatedJson<OrgEdgeRequest>,
) -> Result<Json<OrganizationResponse>, AppError> {
    let org = state
        .organizations
        .add_org_member(&user.username, &globalid, &req.globalid)
        .await?;
    Ok(Json(org.into()))
}

/// DELETE /organizations/:globalid/orgowners/:other
pub async fn remove_org_owner(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path((globalid, other)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .organizations
        .remove_org_owner(&user.username, &globalid, &other)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /organizations/:globalid/orgmembers/:other
pub async fn remove_org_member(
    State(state): State<AppState>,
    LoggedInUser(user): LoggedInUser,
    Path((globalid, other)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .organizations
        .remove_org_member(&user.username, &globalid, &other)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
