/*!
 * Collaborator stores used by translation jobs.
 *
 * Jobs read resources and write translations through these traits only.
 * `InMemoryStore` serves tests and one-off runs; the SQLite `Repository`
 * serves worker processes.
 */

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::database::Repository;
use crate::resource::{Resource, ResourceStatus, TranslationResult};

/// Source of resource snapshots
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>>;

    async fn update_status(&self, id: &str, status: ResourceStatus) -> Result<()>;
}

/// Sink for finished translations
#[async_trait]
pub trait TranslationStore: Send + Sync {
    async fn save(&self, shop_id: &str, result: &TranslationResult) -> Result<()>;
}

/// Both stores in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    resources: RwLock<HashMap<String, Resource>>,
    translations: RwLock<HashMap<(String, String), TranslationResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: Resource) {
        self.resources.write().insert(resource.id.clone(), resource);
    }

    pub fn resource(&self, id: &str) -> Option<Resource> {
        self.resources.read().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<ResourceStatus> {
        self.resources.read().get(id).map(|r| r.status)
    }

    pub fn translation(&self, resource_id: &str, language: &str) -> Option<TranslationResult> {
        self.translations
            .read()
            .get(&(resource_id.to_string(), language.to_string()))
            .cloned()
    }

    pub fn translation_count(&self) -> usize {
        self.translations.read().len()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        Ok(self.resource(id))
    }

    async fn update_status(&self, id: &str, status: ResourceStatus) -> Result<()> {
        let mut resources = self.resources.write();
        let resource = resources
            .get_mut(id)
            .ok_or_else(|| anyhow!("Resource not found: {}", id))?;
        resource.status = status;
        Ok(())
    }
}

#[async_trait]
impl TranslationStore for InMemoryStore {
    async fn save(&self, _shop_id: &str, result: &TranslationResult) -> Result<()> {
        self.translations.write().insert(
            (result.resource_id.clone(), result.language.clone()),
            result.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for Repository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        self.find_resource(id).await
    }

    async fn update_status(&self, id: &str, status: ResourceStatus) -> Result<()> {
        if !self.update_resource_status(id, status).await? {
            return Err(anyhow!("Resource not found: {}", id));
        }
        Ok(())
    }
}

#[async_trait]
impl TranslationStore for Repository {
    async fn save(&self, shop_id: &str, result: &TranslationResult) -> Result<()> {
        self.save_translation(shop_id, result).await
    }
}
