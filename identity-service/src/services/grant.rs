//! Authorization grants: signed, time-bounded credentials that let an
//! application act on behalf of a principal or organization.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::GrantConfig;
use crate::models::Organization;
use crate::services::{OrgGraphValidator, Relation, ServiceError};

/// What a grant is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GrantTarget {
    /// Fields of the principal's own profile.
    User { scopes: Vec<String> },
    /// Act as an organization, with the listed scopes.
    Organization {
        globalid: String,
        scopes: Vec<String>,
    },
}

/// Claims carried by a signed grant. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantClaims {
    /// Principal the grant was issued to.
    pub sub: String,
    pub target: GrantTarget,
    /// Expiration (unix seconds).
    pub exp: i64,
    pub iat: i64,
    /// Grant identifier, the deny-list key.
    pub jti: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedGrant {
    pub token: String,
    pub grant_id: String,
    pub expires_at: i64,
}

/// Revocation contract shared by issuance and verification. The durable
/// deny-list store is an external collaborator; both sides only agree on
/// this lookup.
#[async_trait]
pub trait GrantDenyList: Send + Sync {
    async fn deny(&self, grant_id: &str) -> Result<(), ServiceError>;
    async fn is_denied(&self, grant_id: &str) -> Result<bool, ServiceError>;
}

/// In-memory deny-list for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryDenyList {
    denied: DashSet<String>,
}

impl MemoryDenyList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantDenyList for MemoryDenyList {
    async fn deny(&self, grant_id: &str) -> Result<(), ServiceError> {
        self.denied.insert(grant_id.to_string());
        Ok(())
    }

    async fn is_denied(&self, grant_id: &str) -> Result<bool, ServiceError> {
        Ok(self.denied.contains(grant_id))
    }
}

/// A grant request as it reaches the issuer, target already parsed.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    /// Organization GlobalID, or None for the principal's own profile.
    pub organization: Option<String>,
    pub scopes: Vec<String>,
    /// Caller-requested lifetime in seconds, clamped during issuance.
    pub requested_ttl_seconds: Option<i64>,
}

#[derive(Clone)]
pub struct GrantService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    max_seconds_validity: i64,
    graph: OrgGraphValidator,
    deny_list: Arc<dyn GrantDenyList>,
}

impl GrantService {
    pub fn new(
        config: &GrantConfig,
        graph: OrgGraphValidator,
        deny_list: Arc<dyn GrantDenyList>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            max_seconds_validity: config.max_seconds_validity,
            graph,
            deny_list,
        }
    }

    /// Issue a grant for an authenticated principal, or refuse. No
    /// partial grant is ever produced: scope and relation checks all
    /// pass before anything is signed.
    pub async fn authorize(
        &self,
        principal: Option<&str>,
        request: GrantRequest,
    ) -> Result<SignedGrant, ServiceError> {
        let principal = principal.ok_or(ServiceError::Unauthenticated)?;

        let mut ttl = self.max_seconds_validity;
        let target = match &request.organization {
            Some(globalid) => {
                let relation = self.graph.resolve_relation(principal, globalid).await?;
                if relation == Relation::None {
                    return Err(ServiceError::InsufficientScope);
                }
                let org = self
                    .graph
                    .organization(globalid)
                    .await?
                    .ok_or(ServiceError::OrganizationNotFound)?;
                if !OrgGraphValidator::required_scopes_satisfied(&org, &request.scopes) {
                    return Err(ServiceError::InsufficientScope);
                }
                ttl = clamp_ttl(&org, request.requested_ttl_seconds, self.max_seconds_validity);
                GrantTarget::Organization {
                    globalid: globalid.clone(),
                    scopes: request.scopes.clone(),
                }
            }
            None => {
                if let Some(requested) = request.requested_ttl_seconds {
                    ttl = ttl.min(requested.max(1));
                }
                GrantTarget::User {
                    scopes: request.scopes.clone(),
                }
            }
        };

        let now = Utc::now().timestamp();
        let claims = GrantClaims {
            sub: principal.to_string(),
            target,
            exp: now + ttl,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("grant signing failed: {}", e)))?;

        tracing::info!(
            principal = %claims.sub,
            grant_id = %claims.jti,
            expires_at = claims.exp,
            "Grant issued"
        );

        Ok(SignedGrant {
            token,
            grant_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    /// Verify a grant: signature, expiry and the deny-list.
    pub async fn verify(&self, token: &str) -> Result<GrantClaims, ServiceError> {
        let data = decode::<GrantClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| ServiceError::Unauthenticated)?;

        if self.deny_list.is_denied(&data.claims.jti).await? {
            return Err(ServiceError::GrantRevoked);
        }
        Ok(data.claims)
    }

    /// Revoke a grant by identifier.
    pub async fn revoke(&self, grant_id: &str) -> Result<(), ServiceError> {
        self.deny_list.deny(grant_id).await
    }
}

/// Expiry is the minimum of what the caller asked for, what the
/// organization allows, and the system ceiling.
fn clamp_ttl(org: &Organization, requested: Option<i64>, ceiling: i64) -> i64 {
    let mut ttl = ceiling;
    if org.secondsvalidity > 0 {
        ttl = ttl.min(org.secondsvalidity);
    }
    if let Some(requested) = requested {
        ttl = ttl.min(requested.max(1));
    }
    ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrantConfig;
    use crate::services::{IdentityStore, MemoryStore};

    fn grant_config() -> GrantConfig {
        GrantConfig {
            signing_secret: "test-grant-secret".to_string(),
            max_seconds_validity: 86_400,
        }
    }

    async fn service_with_org(org: Option<Organization>) -> GrantService {
        let store = Arc::new(MemoryStore::new());
        if let Some(org) = org {
            store.insert_organization(&org).await.unwrap();
        }
        GrantService::new(
            &grant_config(),
            OrgGraphValidator::new(store),
            Arc::new(MemoryDenyList::new()),
        )
    }

    #[tokio::test]
    async fn unauthenticated_principal_gets_no_grant() {
        let service = service_with_org(None).await;
        let result = service
            .authorize(
                None,
                GrantRequest {
                    organization: None,
                    scopes: vec!["user:name".to_string()],
                    requested_ttl_seconds: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthenticated)));
    }

    #[tokio::test]
    async fn profile_grant_round_trips_through_verification() {
        let service = service_with_org(None).await;
        let grant = service
            .authorize(
                Some("alice"),
                GrantRequest {
                    organization: None,
                    scopes: vec!["user:name".to_string()],
                    requested_ttl_seconds: Some(600),
                },
            )
            .await
            .unwrap();

        let claims = service.verify(&grant.token).await.unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(claims.exp <= Utc::now().timestamp() + 600);
        assert_eq!(
            claims.target,
            GrantTarget::User {
                scopes: vec!["user:name".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn grant_expiry_never_exceeds_org_seconds_validity() {
        let mut org = Organization::new("acme".to_string(), "alice".to_string());
        org.secondsvalidity = 300;
        let service = service_with_org(Some(org)).await;

        let grant = service
            .authorize(
                Some("alice"),
                GrantRequest {
                    organization: Some("acme".to_string()),
                    scopes: vec![],
                    requested_ttl_seconds: Some(1_000_000),
                },
            )
            .await
            .unwrap();

        assert!(grant.expires_at <= Utc::now().timestamp() + 300);
    }

    #[tokio::test]
    async fn outsider_is_refused_with_insufficient_scope() {
        let org = Organization::new("acme".to_string(), "alice".to_string());
        let service = service_with_org(Some(org)).await;

        let result = service
            .authorize(
                Some("mallory"),
                GrantRequest {
                    organization: Some("acme".to_string()),
                    scopes: vec![],
                    requested_ttl_seconds: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::InsufficientScope)));
    }

    #[tokio::test]
    async fn missing_required_scope_is_refused() {
        let mut org = Organization::new("acme".to_string(), "alice".to_string());
        org.requiredscopes.push(crate::models::RequiredScope {
            scope: "organization:acme:audit".to_string(),
        });
        let service = service_with_org(Some(org)).await;

        let result = service
            .authorize(
                Some("alice"),
                GrantRequest {
                    organization: Some("acme".to_string()),
                    scopes: vec![],
                    requested_ttl_seconds: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::InsufficientScope)));
    }

    #[tokio::test]
    async fn revoked_grant_fails_verification() {
        let service = service_with_org(None).await;
        let grant = service
            .authorize(
                Some("alice"),
                GrantRequest {
                    organization: None,
                    scopes: vec![],
                    requested_ttl_seconds: None,
                },
            )
            .await
            .unwrap();

        service.revoke(&grant.grant_id).await.unwrap();
        assert!(matches!(
            service.verify(&grant.token).await,
            Err(ServiceError::GrantRevoked)
        ));
    }
}
