//! Entity directory port: the branches, kitchens, and suppliers being
//! audited, with the lookups the generator and scoring engine need.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use savora_core::{EntityId, EntityRef, EntityType, UserId};

use crate::error::Result;

/// Directory record for one audited entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInfo {
    /// Identifier.
    pub id: EntityId,
    /// Kind.
    pub entity_type: EntityType,
    /// Display name.
    pub name: String,
    /// Whether the entity is currently operating.
    pub active: bool,
    /// Geographic region, for branches and kitchens.
    pub region: Option<String>,
    /// Responsible manager, for branches and kitchens.
    pub manager_id: Option<UserId>,
}

/// Supplier attributes consumed by the scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierProfile {
    /// Identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Declared product quality score, 0-100.
    pub quality_score: Option<f64>,
    /// Certifications on file.
    pub certifications: Vec<String>,
    /// Central kitchens this supplier declares as destinations.
    pub destination_bcks: Vec<EntityId>,
}

/// Trait for entity directory lookups. Read-only.
#[async_trait::async_trait]
pub trait EntityDirectory: Send + Sync {
    /// Look up one entity.
    async fn get(&self, entity: &EntityRef) -> Result<Option<EntityInfo>>;

    /// Ids of all active entities of one type, stable order.
    async fn list_active(&self, entity_type: EntityType) -> Result<Vec<EntityId>>;

    /// Supplier profile, for supplier scoring.
    async fn supplier_profile(&self, id: EntityId) -> Result<Option<SupplierProfile>>;

    /// Suppliers declaring the given kitchen as a destination.
    async fn suppliers_for_bck(&self, bck_id: EntityId) -> Result<Vec<SupplierProfile>>;
}

/// In-memory entity directory for testing.
#[derive(Debug, Default)]
pub struct InMemoryEntityDirectory {
    entities: Arc<RwLock<HashMap<(EntityType, EntityId), EntityInfo>>>,
    suppliers: Arc<RwLock<HashMap<EntityId, SupplierProfile>>>,
}

impl InMemoryEntityDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity.
    pub async fn add_entity(&self, info: EntityInfo) {
        self.entities
            .write()
            .await
            .insert((info.entity_type, info.id), info);
    }

    /// Add a supplier profile (also registers the supplier entity record).
    pub async fn add_supplier(&self, profile: SupplierProfile) {
        self.add_entity(EntityInfo {
            id: profile.id,
            entity_type: EntityType::Supplier,
            name: profile.name.clone(),
            active: true,
            region: None,
            manager_id: None,
        })
        .await;
        self.suppliers.write().await.insert(profile.id, profile);
    }
}

#[async_trait::async_trait]
impl EntityDirectory for InMemoryEntityDirectory {
    async fn get(&self, entity: &EntityRef) -> Result<Option<EntityInfo>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(entity.entity_type, entity.entity_id))
            .cloned())
    }

    async fn list_active(&self, entity_type: EntityType) -> Result<Vec<EntityId>> {
        let entities = self.entities.read().await;
        let mut ids: Vec<_> = entities
            .values()
            .filter(|e| e.entity_type == entity_type && e.active)
            .map(|e| e.id)
            .collect();
        ids.sort_by_key(|id| *id.as_uuid());
        Ok(ids)
    }

    async fn supplier_profile(&self, id: EntityId) -> Result<Option<SupplierProfile>> {
        Ok(self.suppliers.read().await.get(&id).cloned())
    }

    async fn suppliers_for_bck(&self, bck_id: EntityId) -> Result<Vec<SupplierProfile>> {
        let suppliers = self.suppliers.read().await;
        let mut matching: Vec<_> = suppliers
            .values()
            .filter(|s| s.destination_bcks.contains(&bck_id))
            .cloned()
            .collect();
        matching.sort_by_key(|s| *s.id.as_uuid());
        Ok(matching)
    }
}
