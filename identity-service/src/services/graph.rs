//! Organization graph resolution.
//!
//! Authority over an organization can be held directly (an entry in its
//! `owners`/`members`) or transitively through other organizations listed
//! in `orgowners`/`orgmembers`. Traversal is breadth-first with a visited
//! set keyed by GlobalID, so work is bounded by the number of distinct
//! organizations even if the edge set is (incorrectly) cyclic.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::models::Organization;
use crate::services::{IdentityStore, ServiceError};

/// A principal's resolved authority over an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Owner,
    Member,
    None,
}

#[derive(Clone)]
pub struct OrgGraphValidator {
    store: Arc<dyn IdentityStore>,
}

impl OrgGraphValidator {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Read an organization through the validator's store handle.
    pub async fn organization(
        &self,
        globalid: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        self.store.get_organization(globalid).await
    }

    /// Resolve the relation of `username` to the organization `globalid`.
    /// Owner dominates Member when both are reachable.
    pub async fn resolve_relation(
        &self,
        username: &str,
        globalid: &str,
    ) -> Result<Relation, ServiceError> {
        if self.store.get_organization(globalid).await?.is_none() {
            return Err(ServiceError::OrganizationNotFound);
        }

        if self.is_owner(username, globalid).await? {
            return Ok(Relation::Owner);
        }
        if self.is_member(username, globalid).await? {
            return Ok(Relation::Member);
        }
        Ok(Relation::None)
    }

    /// Owner pass: outward along `orgowners` edges, crediting direct
    /// `owners` entries of every visited organization.
    pub async fn is_owner(&self, username: &str, globalid: &str) -> Result<bool, ServiceError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(globalid.to_string());
        queue.push_back(globalid.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(org) = self.store.get_organization(&current).await? else {
                // Dangling edge: the referenced organization is gone.
                continue;
            };
            if org.owners.iter().any(|o| o == username) {
                return Ok(true);
            }
            for edge in &org.orgowners {
                if visited.insert(edge.clone()) {
                    queue.push_back(edge.clone());
                }
            }
        }
        Ok(false)
    }

    /// Member pass: outward along both edge kinds (an organization that
    /// owns the target is a fortiori a member of it), crediting `members`
    /// entries, and `owners` entries of organizations other than the
    /// target itself.
    pub async fn is_member(&self, username: &str, globalid: &str) -> Result<bool, ServiceError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(globalid.to_string());
        queue.push_back(globalid.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(org) = self.store.get_organization(&current).await? else {
                continue;
            };
            if org.members.iter().any(|m| m == username) {
                return Ok(true);
            }
            if current != globalid && org.owners.iter().any(|o| o == username) {
                return Ok(true);
            }
            for edge in org.orgowners.iter().chain(org.orgmembers.iter()) {
                if visited.insert(edge.clone()) {
                    queue.push_back(edge.clone());
                }
            }
        }
        Ok(false)
    }

    /// Check whether listing `to` in the org-owner/org-member edges of
    /// `target` would let an organization transitively own itself.
    pub async fn edge_would_cycle(&self, target: &str, to: &str) -> Result<bool, ServiceError> {
        if target == to {
            return Ok(true);
        }
        // The new edge makes `to` reachable from `target`. A loop closes
        // iff `target` is already reachable from `to`, so walk outward
        // from `to` and look for `target`.
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(to.to_string());
        queue.push_back(to.to_string());

        while let Some(current) = queue.pop_front() {
            if current == target {
                return Ok(true);
            }
            let Some(org) = self.store.get_organization(&current).await? else {
                continue;
            };
            for edge in org.orgowners.iter().chain(org.orgmembers.iter()) {
                if visited.insert(edge.clone()) {
                    queue.push_back(edge.clone());
                }
            }
        }
        Ok(false)
    }

    /// Required scopes are evaluated only after the relation is resolved:
    /// every scope the organization mandates must be explicitly present in
    /// the requested scope list.
    pub fn required_scopes_satisfied(org: &Organization, requested: &[String]) -> bool {
        org.requiredscopes
            .iter()
            .all(|required| requested.iter().any(|s| s == &required.scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequiredScope;
    use crate::services::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, OrgGraphValidator) {
        let store = Arc::new(MemoryStore::new());
        let validator = OrgGraphValidator::new(store.clone());
        (store, validator)
    }

    #[tokio::test]
    async fn direct_owner_and_member_resolve() {
        let (store, validator) = setup().await;
        let mut org = Organization::new("acme".to_string(), "alice".to_string());
        org.members.push("bob".to_string());
        store.insert_organization(&org).await.unwrap();

        assert_eq!(
            validator.resolve_relation("alice", "acme").await.unwrap(),
            Relation::Owner
        );
        assert_eq!(
            validator.resolve_relation("bob", "acme").await.unwrap(),
            Relation::Member
        );
        assert_eq!(
            validator.resolve_relation("mallory", "acme").await.unwrap(),
            Relation::None
        );
    }

    #[tokio::test]
    async fn transitive_owner_through_orgowners_edge() {
        let (store, validator) = setup().await;
        // A lists B in orgowners; B lists carol in owners.
        let mut a = Organization::new("a-corp".to_string(), "alice".to_string());
        a.orgowners.push("b-corp".to_string());
        let b = Organization::new("b-corp".to_string(), "carol".to_string());
        store.insert_organization(&a).await.unwrap();
        store.insert_organization(&b).await.unwrap();

        assert_eq!(
            validator.resolve_relation("carol", "a-corp").await.unwrap(),
            Relation::Owner
        );
    }

    #[tokio::test]
    async fn owner_dominates_member_when_both_reachable() {
        let (store, validator) = setup().await;
        let mut org = Organization::new("acme".to_string(), "alice".to_string());
        org.members.push("alice".to_string());
        store.insert_organization(&org).await.unwrap();

        assert_eq!(
            validator.resolve_relation("alice", "acme").await.unwrap(),
            Relation::Owner
        );
    }

    #[tokio::test]
    async fn traversal_terminates_on_cyclic_graph() {
        let (store, validator) = setup().await;
        let mut a = Organization::new("aaa".to_string(), "alice".to_string());
        a.orgowners.push("bbb".to_string());
        let mut b = Organization::new("bbb".to_string(), "bob".to_string());
        b.orgowners.push("aaa".to_string());
        store.insert_organization(&a).await.unwrap();
        store.insert_organization(&b).await.unwrap();

        assert_eq!(
            validator.resolve_relation("bob", "aaa").await.unwrap(),
            Relation::Owner
        );
        assert_eq!(
            validator.resolve_relation("mallory", "aaa").await.unwrap(),
            Relation::None
        );
    }

    #[tokio::test]
    async fn detects_cycle_before_edge_insertion() {
        let (store, validator) = setup().await;
        let mut a = Organization::new("aaa".to_string(), "alice".to_string());
        a.orgowners.push("bbb".to_string());
        let b = Organization::new("bbb".to_string(), "bob".to_string());
        store.insert_organization(&a).await.unwrap();
        store.insert_organization(&b).await.unwrap();

        // bbb -> aaa would close the loop aaa -> bbb -> aaa.
        assert!(validator.edge_would_cycle("bbb", "aaa").await.unwrap());
        assert!(!validator.edge_would_cycle("aaa", "ccc").await.unwrap());
        assert!(validator.edge_would_cycle("aaa", "aaa").await.unwrap());
    }

    #[tokio::test]
    async fn required_scopes_must_be_explicitly_requested() {
        let mut org = Organization::new("acme".to_string(), "alice".to_string());
        org.requiredscopes.push(RequiredScope {
            scope: "organization:acme:billing".to_string(),
        });

        assert!(!OrgGraphValidator::required_scopes_satisfied(
            &org,
            &["user:name".to_string()]
        ));
        assert!(OrgGraphValidator::required_scopes_satisfied(
            &org,
            &[
                "user:name".to_string(),
                "organization:acme:billing".to_string()
            ]
        ));
    }
}
