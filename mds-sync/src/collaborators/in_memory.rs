use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use mds_core::common::error::{Result, SyncError};
use mds_core::contracts::{CacheFeed, Sink};
use mds_core::domain::{EntityIdentifier, EntityRecord, EntityTypeId};

/// In-memory destination system for development and testing. Entities
/// are keyed by the value of the configured identifier field.
pub struct InMemorySink {
    entity_type: EntityTypeId,
    id_field: String,
    entities: Mutex<HashMap<EntityIdentifier, EntityRecord>>,
    updates: Mutex<usize>,
}

impl InMemorySink {
    pub fn new(entity_type: EntityTypeId, id_field: impl Into<String>) -> Self {
        InMemorySink {
            entity_type,
            id_field: id_field.into(),
            entities: Mutex::new(HashMap::new()),
            updates: Mutex::new(0),
        }
    }

    fn id_of(&self, entity: &EntityRecord) -> Result<EntityIdentifier> {
        entity
            .get_non_null(&self.id_field)
            .map(|v| EntityIdentifier::new(v.to_string()))
            .ok_or_else(|| {
                SyncError::destination(format!(
                    "{} entity is missing its '{}' identifier",
                    self.entity_type, self.id_field
                ))
            })
    }

    /// Seed an entity directly, for tests and demos.
    pub fn insert(&self, entity: EntityRecord) {
        let id = self
            .id_of(&entity)
            .expect("seeded entity must carry an identifier");
        self.entities.lock().unwrap().insert(id, entity);
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn update_count(&self) -> usize {
        *self.updates.lock().unwrap()
    }

    pub fn entities(&self) -> Vec<EntityRecord> {
        self.entities.lock().unwrap().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.entities.lock().unwrap().clear();
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn new_entity(&self) -> Result<EntityRecord> {
        Ok(EntityRecord::new(self.entity_type.clone()))
    }

    async fn create(&self, mut entity: EntityRecord) -> Result<EntityRecord> {
        if entity.get_non_null(&self.id_field).is_none() {
            entity.set(self.id_field.clone(), Uuid::new_v4().to_string());
        }
        let id = self.id_of(&entity)?;
        self.entities.lock().unwrap().insert(id.clone(), entity.clone());
        debug!("Created {} entity {}", self.entity_type, id);
        Ok(entity)
    }

    async fn get(&self, id: &EntityIdentifier) -> Result<Option<EntityRecord>> {
        Ok(self.entities.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, entity: &EntityRecord) -> Result<()> {
        let id = self.id_of(entity)?;
        self.entities.lock().unwrap().insert(id, entity.clone());
        *self.updates.lock().unwrap() += 1;
        Ok(())
    }

    async fn delete(&self, entity: &EntityRecord) -> Result<()> {
        let id = self.id_of(entity)?;
        self.entities.lock().unwrap().remove(&id);
        debug!("Deleted {} entity {}", self.entity_type, id);
        Ok(())
    }

    async fn entity_identifiers(&self) -> Result<Vec<EntityIdentifier>> {
        Ok(self.entities.lock().unwrap().keys().cloned().collect())
    }
}

/// Cache feed that bulk-loads whatever the sink currently holds.
pub struct SinkCacheFeed {
    sink: Arc<dyn Sink>,
}

impl SinkCacheFeed {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        SinkCacheFeed { sink }
    }
}

#[async_trait]
impl CacheFeed for SinkCacheFeed {
    async fn load_entities(&self) -> Result<Vec<EntityRecord>> {
        let mut entities = Vec::new();
        for id in self.sink.entity_identifiers().await? {
            if let Some(entity) = self.sink.get(&id).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_an_identifier_when_absent() {
        let sink = InMemorySink::new(EntityTypeId::from("customer"), "id");
        let created = sink
            .create(EntityRecord::new(EntityTypeId::from("customer")).with("name", "Ada"))
            .await
            .unwrap();

        assert!(created.get_non_null("id").is_some());
        assert_eq!(sink.entity_count(), 1);
    }

    #[tokio::test]
    async fn cache_feed_reflects_sink_contents() {
        let sink = Arc::new(InMemorySink::new(EntityTypeId::from("customer"), "id"));
        sink.insert(EntityRecord::new(EntityTypeId::from("customer")).with("id", "d-1"));
        sink.insert(EntityRecord::new(EntityTypeId::from("customer")).with("id", "d-2"));

        let feed = SinkCacheFeed::new(sink);
        assert_eq!(feed.load_entities().await.unwrap().len(), 2);
    }
}
