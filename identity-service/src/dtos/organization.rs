use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Organization, RequiredScope};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 3, max = 150, message = "GlobalID must be 3 to 150 characters"))]
    pub globalid: String,

    /// Ceiling in seconds for grants issued against this organization;
    /// zero means no organization-level ceiling.
    pub secondsvalidity: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubOrganizationRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
}

/// Adding a user to the owner or member roster.
#[derive(Debug, Deserialize, Validate)]
pub struct RosterRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
}

/// Adding another organization as org-owner or org-member.
#[derive(Debug, Deserialize, Validate)]
pub struct OrgEdgeRequest {
    #[validate(length(min = 1, message = "GlobalID is required"))]
    pub globalid: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrganizationResponse {
    pub globalid: String,
    pub owners: Vec<String>,
    pub members: Vec<String>,
    pub orgowners: Vec<String>,
    pub orgmembers: Vec<String>,
    pub requiredscopes: Vec<RequiredScope>,
    pub secondsvalidity: i64,
}

impl From<Organization> for OrganizationResponse {
    fn from(org: Organization) -> Self {
        Self {
            globalid: org.globalid,
            owners: org.owners,
            members: org.members,
            orgowners: org.orgowners,
            orgmembers: org.orgmembers,
            requiredscopes: org.requiredscopes,
            secondsvalidity: org.secondsvalidity,
        }
    }
}
