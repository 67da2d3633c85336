//! Organization management: creation, the owner and member rosters, and
//! the organization-to-organization delegation edges. Every mutation is
//! authorized against the ownership graph before it touches the store.

use std::sync::Arc;

use crate::models::{validate_organization, validate_sub_organization, Organization};
use crate::services::{IdentityStore, OrgGraphValidator, ServiceError};

#[derive(Clone)]
pub struct OrganizationService {
    store: Arc<dyn IdentityStore>,
    graph: OrgGraphValidator,
}

impl OrganizationService {
    pub fn new(store: Arc<dyn IdentityStore>, graph: OrgGraphValidator) -> Self {
        Self { store, graph }
    }

    /// Create a top-level organization with the caller as sole owner.
    pub async fn create(
        &self,
        actor: &str,
        globalid: &str,
        secondsvalidity: Option<i64>,
    ) -> Result<Organization, ServiceError> {
        let mut org = Organization::new(globalid.to_string(), actor.to_string());
        if let Some(seconds) = secondsvalidity {
            org.secondsvalidity = seconds;
        }
        // Dotted names are reserved for sub-organizations.
        validate_organization(&org)?;
        self.store.insert_organization(&org).await?;
        tracing::info!(globalid = %globalid, owner = %actor, "Organization created");
        Ok(org)
    }

    /// Create a sub-organization under a parent the caller owns. The
    /// parent is wired in as an organization owner so ownership flows
    /// down the tree.
    pub async fn create_sub(
        &self,
        actor: &str,
        parent_globalid: &str,
        name: &str,
    ) -> Result<Organization, ServiceError> {
        self.require_owner(actor, parent_globalid).await?;

        let globalid = format!("{}.{}", parent_globalid, name);
        let mut org = Organization::new(globalid.clone(), actor.to_string());
        org.orgowners.push(parent_globalid.to_string());
        validate_sub_organization(&org)?;
        self.store.insert_organization(&org).await?;
        tracing::info!(globalid = %globalid, parent = %parent_globalid, "Sub-organization created");
        Ok(org)
    }

    pub async fn get(&self, globalid: &str) -> Result<Organization, ServiceError> {
        self.store
            .get_organization(globalid)
            .await?
            .ok_or(ServiceError::OrganizationNotFound)
    }

    /// Add a user to the owner roster. Idempotent; an owner is never
    /// listed as a member at the same time.
    pub async fn add_owner(
        &self,
        actor: &str,
        globalid: &str,
        username: &str,
    ) -> Result<Organization, ServiceError> {
        self.require_owner(actor, globalid).await?;
        self.require_user(username).await?;

        let mut org = self.get(globalid).await?;
        org.members.retain(|m| m != username);
        if !org.owners.iter().any(|o| o == username) {
            org.owners.push(username.to_string());
        }
        self.store.update_organization(&org).await?;
        Ok(org)
    }

    /// Remove an owner. The store refuses to drop the last one.
    pub async fn remove_owner(
        &self,
        actor: &str,
        globalid: &str,
        username: &str,
    ) -> Result<(), ServiceError> {
        self.require_owner(actor, globalid).await?;
        self.store.remove_owner(globalid, username).await
    }

    pub async fn add_member(
        &self,
        actor: &str,
        globalid: &str,
        username: &str,
    ) -> Result<Organization, ServiceError> {
        self.require_owner(actor, globalid).await?;
        self.require_user(username).await?;

        let mut org = self.get(globalid).await?;
        if org.owners.iter().any(|o| o == username) {
            return Ok(org);
        }
        if !org.members.iter().any(|m| m == username) {
            org.members.push(username.to_string());
        }
        self.store.update_organization(&org).await?;
        Ok(org)
    }

    pub async fn remove_member(
        &self,
        actor: &str,
        globalid: &str,
        username: &str,
    ) -> Result<(), ServiceError> {
        self.require_owner(actor, globalid).await?;
        let mut org = self.get(globalid).await?;
        org.members.retain(|m| m != username);
        self.store.update_organization(&org).await
    }

    /// Grant another organization owner rights over this one. Rejected
    /// when the edge would make the delegation graph cyclic.
    pub async fn add_org_owner(
        &self,
        actor: &str,
        globalid: &str,
        other: &str,
    ) -> Result<Organization, ServiceError> {
        self.add_org_edge(actor, globalid, other, true).await
    }

    pub async fn add_org_member(
        &self,
        actor: &str,
        globalid: &str,
        other: &str,
    ) -> Result<Organization, ServiceError> {
        self.add_org_edge(actor, globalid, other, false).await
    }

    pub async fn remove_org_owner(
        &self,
        actor: &str,
        globalid: &str,
        other: &str,
    ) -> Result<(), ServiceError> {
        self.require_owner(actor, globalid).await?;
        let mut org = self.get(globalid).await?;
        org.orgowners.retain(|o| o != other);
        self.store.update_organization(&org).await
    }

    pub async fn remove_org_member(
        &self,
        actor: &str,
        globalid: &str,
        other: &str,
    ) -> Result<(), ServiceError> {
        self.require_owner(actor, globalid).await?;
        let mut org = self.get(globalid).await?;
        org.orgmembers.retain(|o| o != other);
        self.store.update_organization(&org).await
    }

    async fn add_org_edge(
        &self,
        actor: &str,
        globalid: &str,
        other: &str,
        as_owner: bool,
    ) -> Result<Organization, ServiceError> {
        self.require_owner(actor, globalid).await?;
        if self.store.get_organization(other).await?.is_none() {
            return Err(ServiceError::OrganizationNotFound);
        }
        if self.graph.edge_would_cycle(globalid, other).await? {
            return Err(ServiceError::CycleDetected);
        }

        let mut org = self.get(globalid).await?;
        let roster = if as_owner {
            &mut org.orgowners
        } else {
            &mut org.orgmembers
        };
        if !roster.iter().any(|o| o == other) {
            roster.push(other.to_string());
        }
        self.store.update_organization(&org).await?;
        Ok(org)
    }

    async fn require_owner(&self, actor: &str, globalid: &str) -> Result<(), ServiceError> {
        if self.store.get_organization(globalid).await?.is_none() {
            return Err(ServiceError::OrganizationNotFound);
        }
        if !self.graph.is_owner(actor, globalid).await? {
            return Err(ServiceError::InsufficientScope);
        }
        Ok(())
    }

    async fn require_user(&self, username: &str) -> Result<(), ServiceError> {
        if self.store.get_user(username).await?.is_none() {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{User, UserStatus};
    use crate::services::MemoryStore;

    async fn seed_user(store: &MemoryStore, username: &str) {
        let mut user = User::new(username.to_string());
        user.status = UserStatus::Active;
        store.insert_user(&user).await.unwrap();
    }

    async fn setup() -> (Arc<MemoryStore>, OrganizationService) {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "alice").await;
        seed_user(&store, "bob").await;
        let graph = OrgGraphValidator::new(store.clone());
        (store.clone(), OrganizationService::new(store, graph))
    }

    #[tokio::test]
    async fn creator_becomes_sole_owner() {
        let (_, svc) = setup().await;
        let org = svc.create("alice", "acme", None).await.unwrap();
        assert_eq!(org.owners, vec!["alice"]);
        assert!(org.members.is_empty());
    }

    #[tokio::test]
    async fn suborganization_inherits_ownership_through_parent() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        let sub = svc.create_sub("alice", "acme", "sales").await.unwrap();
        assert_eq!(sub.globalid, "acme.sales");
        assert_eq!(sub.orgowners, vec!["acme"]);

        // bob cannot create under acme.
        assert!(matches!(
            svc.create_sub("bob", "acme", "ops").await,
            Err(ServiceError::InsufficientScope)
        ));
    }

    #[tokio::test]
    async fn promoting_a_member_removes_the_member_entry() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        svc.add_member("alice", "acme", "bob").await.unwrap();
        let org = svc.add_owner("alice", "acme", "bob").await.unwrap();
        assert!(org.owners.iter().any(|o| o == "bob"));
        assert!(org.members.is_empty());
    }

    #[tokio::test]
    async fn adding_an_owner_as_member_is_a_no_op() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        let org = svc.add_member("alice", "acme", "alice").await.unwrap();
        assert!(org.members.is_empty());
    }

    #[tokio::test]
    async fn last_owner_cannot_be_removed() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        assert!(matches!(
            svc.remove_owner("alice", "acme", "alice").await,
            Err(ServiceError::LastOwner)
        ));

        svc.add_owner("alice", "acme", "bob").await.unwrap();
        svc.remove_owner("alice", "acme", "alice").await.unwrap();
        let org = svc.get("acme").await.unwrap();
        assert_eq!(org.owners, vec!["bob"]);
    }

    #[tokio::test]
    async fn delegation_cycle_is_rejected() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        svc.create("alice", "umbrella", None).await.unwrap();
        svc.add_org_owner("alice", "acme", "umbrella").await.unwrap();
        assert!(matches!(
            svc.add_org_member("alice", "umbrella", "acme").await,
            Err(ServiceError::CycleDetected)
        ));
        // Self-edges are the smallest cycle.
        assert!(matches!(
            svc.add_org_owner("alice", "acme", "acme").await,
            Err(ServiceError::CycleDetected)
        ));
    }

    #[tokio::test]
    async fn transitive_owner_can_manage_the_suborganization() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        svc.create_sub("alice", "acme", "sales").await.unwrap();
        svc.add_owner("alice", "acme", "bob").await.unwrap();

        // bob owns acme, and therefore acme.sales transitively.
        let org = svc.add_member("bob", "acme.sales", "bob").await.unwrap();
        assert!(org.members.iter().any(|m| m == "bob"));
    }

    #[tokio::test]
    async fn unknown_target_user_is_rejected() {
        let (_, svc) = setup().await;
        svc.create("alice", "acme", None).await.unwrap();
        assert!(matches!(
            svc.add_owner("alice", "acme", "nobody").await,
            Err(ServiceError::UserNotFound)
        ));
    }
}
