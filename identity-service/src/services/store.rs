//! Persistence for users and organizations.
//!
//! Everything goes through the [`IdentityStore`] trait: a MongoDB
//! implementation for deployment and an in-memory one for tests. Callers
//! validate entities before persisting; the store re-checks organizations
//! so an invalid record can never land.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{Organization, User};
use crate::services::ServiceError;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<User>, ServiceError>;
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError>;
    async fn update_user(&self, user: &User) -> Result<(), ServiceError>;

    async fn get_organization(&self, globalid: &str)
        -> Result<Option<Organization>, ServiceError>;
    async fn insert_organization(&self, org: &Organization) -> Result<(), ServiceError>;
    async fn update_organization(&self, org: &Organization) -> Result<(), ServiceError>;

    /// Remove `username` from the owners of `globalid`. Atomic: fails with
    /// [`ServiceError::LastOwner`] rather than ever leaving zero owners,
    /// also under concurrent removals.
    async fn remove_owner(&self, globalid: &str, username: &str) -> Result<(), ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

fn ensure_valid_organization(org: &Organization) -> Result<(), ServiceError> {
    if org.globalid.contains('.') {
        crate::models::validate_sub_organization(org)?;
    } else {
        crate::models::validate_organization(org)?;
    }
    Ok(())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == 11000
    )
}

/// MongoDB-backed store.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: String,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, ServiceError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            client,
            database: database.to_string(),
        })
    }

    fn users(&self) -> Collection<User> {
        self.client.database(&self.database).collection("users")
    }

    fn organizations(&self) -> Collection<Organization> {
        self.client
            .database(&self.database)
            .collection("organizations")
    }

    /// Create the unique indexes the invariants rely on.
    pub async fn initialize_indexes(&self) -> Result<(), ServiceError> {
        let unique = IndexOptions::builder().unique(true).build();
        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "_id": 1 })
                    .options(unique.clone())
                    .build(),
                None,
            )
            .await?;
        self.organizations()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "_id": 1 })
                    .options(unique)
                    .build(),
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MongoStore {
    async fn get_user(&self, username: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.users().find_one(doc! { "_id": username }, None).await?)
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        self.users().insert_one(user, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                ServiceError::UserAlreadyExists
            } else {
                ServiceError::Database(e)
            }
        })?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        let result = self
            .users()
            .replace_one(doc! { "_id": &user.username }, user, None)
            .await?;
        if result.matched_count == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }

    async fn get_organization(
        &self,
        globalid: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        Ok(self
            .organizations()
            .find_one(doc! { "_id": globalid }, None)
            .await?)
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), ServiceError> {
        ensure_valid_organization(org)?;
        self.organizations()
            .insert_one(org, None)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    ServiceError::OrganizationAlreadyExists
                } else {
                    ServiceError::Database(e)
                }
            })?;
        Ok(())
    }

    async fn update_organization(&self, org: &Organization) -> Result<(), ServiceError> {
        ensure_valid_organization(org)?;
        let result = self
            .organizations()
            .replace_one(doc! { "_id": &org.globalid }, org, None)
            .await?;
        if result.matched_count == 0 {
            return Err(ServiceError::OrganizationNotFound);
        }
        Ok(())
    }

    async fn remove_owner(&self, globalid: &str, username: &str) -> Result<(), ServiceError> {
        // The "owners.1 exists" clause makes the last-owner guard part of
        // the matched filter, so the check-and-remove is a single atomic
        // server-side operation.
        let result = self
            .organizations()
            .update_one(
                doc! {
                    "_id": globalid,
                    "owners": username,
                    "owners.1": { "$exists": true },
                },
                doc! { "$pull": { "owners": username } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return match self.get_organization(globalid).await? {
                None => Err(ServiceError::OrganizationNotFound),
                Some(org) if !org.owners.iter().any(|o| o == username) => {
                    Err(ServiceError::UserNotFound)
                }
                Some(_) => Err(ServiceError::LastOwner),
            };
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }
}

/// In-memory store used by tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, User>>,
    organizations: Mutex<HashMap<String, Organization>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_users(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, User>>, ServiceError> {
        self.users
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("users mutex poisoned: {}", e)))
    }

    fn lock_orgs(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Organization>>, ServiceError> {
        self.organizations
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("orgs mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_user(&self, username: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.lock_users()?.get(username).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut users = self.lock_users()?;
        if users.contains_key(&user.username) {
            return Err(ServiceError::UserAlreadyExists);
        }
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut users = self.lock_users()?;
        if !users.contains_key(&user.username) {
            return Err(ServiceError::UserNotFound);
        }
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn get_organization(
        &self,
        globalid: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        Ok(self.lock_orgs()?.get(globalid).cloned())
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), ServiceError> {
        ensure_valid_organization(org)?;
        let mut orgs = self.lock_orgs()?;
        if orgs.contains_key(&org.globalid) {
            return Err(ServiceError::OrganizationAlreadyExists);
        }
        orgs.insert(org.globalid.clone(), org.clone());
        Ok(())
    }

    async fn update_organization(&self, org: &Organization) -> Result<(), ServiceError> {
        ensure_valid_organization(org)?;
        let mut orgs = self.lock_orgs()?;
        if !orgs.contains_key(&org.globalid) {
            return Err(ServiceError::OrganizationNotFound);
        }
        orgs.insert(org.globalid.clone(), org.clone());
        Ok(())
    }

    async fn remove_owner(&self, globalid: &str, username: &str) -> Result<(), ServiceError> {
        // Single map lock serializes ownership edits, matching the
        // per-organization discipline of the Mongo implementation.
        let mut orgs = self.lock_orgs()?;
        let org = orgs
            .get_mut(globalid)
            .ok_or(ServiceError::OrganizationNotFound)?;
        if !org.owners.iter().any(|o| o == username) {
            return Err(ServiceError::UserNotFound);
        }
        if org.owners.len() == 1 {
            return Err(ServiceError::LastOwner);
        }
        org.owners.retain(|o| o != username);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
