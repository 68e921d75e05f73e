//! Identity and role lookup port. Read-only; the engine never owns users.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use savora_core::{UserId, UserRole};

use crate::error::Result;

/// A user as seen by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Role.
    pub role: UserRole,
    /// Whether the account is active.
    pub active: bool,
    /// When the account was created. Used for stable "first user" ordering.
    pub created_at: DateTime<Utc>,
}

/// Trait for identity lookups.
#[async_trait::async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Look up one user.
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// All active users with the given role, ordered by (created_at, id).
    ///
    /// The ordering is load-bearing: "first active audit manager" assignment
    /// must be deterministic, not latest-login or map-iteration order.
    async fn users_by_role(&self, role: UserRole) -> Result<Vec<User>>;

    /// Regions the user is assigned to cover.
    async fn region_assignments(&self, user_id: UserId) -> Result<Vec<String>>;
}

/// In-memory identity directory for testing.
#[derive(Debug, Default)]
pub struct InMemoryIdentityDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    regions: Arc<RwLock<HashMap<UserId, Vec<String>>>>,
}

impl InMemoryIdentityDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user.
    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    /// Assign a region to a user.
    pub async fn assign_region(&self, user_id: UserId, region: &str) {
        self.regions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(region.to_string());
    }
}

#[async_trait::async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn users_by_role(&self, role: UserRole) -> Result<Vec<User>> {
        let users = self.users.read().await;
        let mut matching: Vec<_> = users
            .values()
            .filter(|u| u.role == role && u.active)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(matching)
    }

    async fn region_assignments(&self, user_id: UserId) -> Result<Vec<String>> {
        Ok(self
            .regions
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}
