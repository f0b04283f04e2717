//! Built-in duplication rules: indexed duplication-key lookup through
//! the entity cache, and shared-identifier resolution through the
//! mapping cache.

use std::collections::{HashSet, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mds_core::common::error::Result;
use mds_core::contracts::MetadataProvider;
use mds_core::domain::{
    Duplicate, EntityIdentifier, EntityRecord, EntityTypeId, MappingKey, SourceSystemId,
};

use super::DuplicationRule;
use crate::cache::{CacheIndexHandle, EntityCache};
use crate::mapping::MappingDataRepository;

/// Exact-match lookup over the homogenized values of designated
/// duplication-key properties. Each key gets its own cache index; hits
/// across all keys are unioned, every one reported `Positive`. Inactive
/// unless the entity's type is among the run's known entity types.
pub struct DuplicationKeyRule {
    known_entity_types: HashSet<EntityTypeId>,
    metadata: Arc<dyn MetadataProvider>,
    indices: Vec<(String, CacheIndexHandle)>,
}

impl DuplicationKeyRule {
    pub fn new(
        cache: &Arc<EntityCache>,
        duplication_keys: &[String],
        known_entity_types: HashSet<EntityTypeId>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        let indices = duplication_keys
            .iter()
            .map(|key| {
                let field = key.clone();
                let getter: crate::cache::ValueGetter =
                    Arc::new(move |entity: &EntityRecord| entity.get(&field).cloned());
                (key.clone(), cache.create_index(key.clone(), getter))
            })
            .collect();
        DuplicationKeyRule {
            known_entity_types,
            metadata,
            indices,
        }
    }
}

#[async_trait]
impl DuplicationRule for DuplicationKeyRule {
    fn name(&self) -> &'static str {
        "duplication-key"
    }

    async fn find_duplicates(&self, entity: &EntityRecord) -> Result<Vec<Duplicate>> {
        if !self.known_entity_types.contains(entity.entity_type()) {
            return Ok(Vec::new());
        }

        let mut matched: BTreeSet<EntityIdentifier> = BTreeSet::new();
        for (key, index) in &self.indices {
            let Some(value) = entity.get_non_null(key) else {
                continue;
            };
            for hit in index.get_entities(value) {
                if let Some(id) = self.metadata.destination_identifier(&hit) {
                    matched.insert(id);
                }
            }
        }

        if !matched.is_empty() {
            debug!(
                "Duplication keys matched {} destination entities",
                matched.len()
            );
        }
        Ok(matched.into_iter().map(Duplicate::positive).collect())
    }
}

/// Resolves duplicates through source systems that share an identifier
/// space with the current one: a mapping for the same source entity id
/// under a sharing source system points at the duplicate destination
/// entity. Every hit is `Positive`.
pub struct SharedIdentifierRule {
    entity_type: EntityTypeId,
    sharing_sources: Vec<SourceSystemId>,
    mappings: Arc<MappingDataRepository>,
    metadata: Arc<dyn MetadataProvider>,
}

impl SharedIdentifierRule {
    pub fn new(
        entity_type: EntityTypeId,
        sharing_sources: Vec<SourceSystemId>,
        mappings: Arc<MappingDataRepository>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        SharedIdentifierRule {
            entity_type,
            sharing_sources,
            mappings,
            metadata,
        }
    }
}

#[async_trait]
impl DuplicationRule for SharedIdentifierRule {
    fn name(&self) -> &'static str {
        "shared-identifier"
    }

    async fn find_duplicates(&self, entity: &EntityRecord) -> Result<Vec<Duplicate>> {
        let Some(source_id) = self.metadata.source_identifier(entity) else {
            return Ok(Vec::new());
        };

        let mut duplicates = Vec::new();
        for sharing in &self.sharing_sources {
            let key = MappingKey::new(
                self.entity_type.clone(),
                sharing.clone(),
                source_id.clone(),
            );
            if let Some(mapping) = self.mappings.get(&key) {
                if mapping.in_set(mds_core::domain::MappingSet::NonRemoved) {
                    duplicates.push(Duplicate::positive(mapping.destination_entity_id));
                }
            }
        }
        Ok(duplicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_core::contracts::CacheFeed;
    use mds_core::domain::{
        DestinationSystemId, FieldValue, Mapping, MappingOrigin,
    };
    use mds_core::storage::InMemoryRepository;

    use crate::collaborators::FieldMetadataProvider;
    use crate::homogenize::CompositeHomogenizer;

    struct StaticCacheFeed {
        entities: Vec<EntityRecord>,
    }

    #[async_trait]
    impl CacheFeed for StaticCacheFeed {
        async fn load_entities(&self) -> Result<Vec<EntityRecord>> {
            Ok(self.entities.clone())
        }
    }

    fn customer(id: &str, email: &str) -> EntityRecord {
        EntityRecord::new(EntityTypeId::from("customer"))
            .with("id", id)
            .with("email", email)
    }

    async fn populated_cache(entities: Vec<EntityRecord>) -> Arc<EntityCache> {
        let cache = Arc::new(EntityCache::new(
            EntityTypeId::from("customer"),
            Arc::new(FieldMetadataProvider::standard()),
            Arc::new(CompositeHomogenizer::standard()),
        ));
        let feed: Arc<dyn CacheFeed> = Arc::new(StaticCacheFeed { entities });
        cache.populate(Some(&feed)).await.unwrap();
        cache
    }

    #[tokio::test]
    async fn key_rule_matches_homogenized_values() {
        let cache = populated_cache(vec![customer("d-1", "Ada@Example.com")]).await;
        let rule = DuplicationKeyRule::new(
            &cache,
            &["email".to_string()],
            HashSet::from([EntityTypeId::from("customer")]),
            Arc::new(FieldMetadataProvider::standard()),
        );

        let incoming = EntityRecord::new(EntityTypeId::from("customer"))
            .with("source_id", "s-1")
            .with("email", "  ada@example.COM ");
        let duplicates = rule.find_duplicates(&incoming).await.unwrap();
        assert_eq!(duplicates, vec![Duplicate::positive("d-1")]);
    }

    #[tokio::test]
    async fn key_rule_is_inactive_for_unknown_entity_types() {
        let cache = populated_cache(vec![customer("d-1", "ada@example.com")]).await;
        let rule = DuplicationKeyRule::new(
            &cache,
            &["email".to_string()],
            HashSet::from([EntityTypeId::from("invoice")]),
            Arc::new(FieldMetadataProvider::standard()),
        );

        let incoming =
            EntityRecord::new(EntityTypeId::from("customer")).with("email", "ada@example.com");
        assert!(rule.find_duplicates(&incoming).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_rule_skips_null_key_values() {
        let cache = populated_cache(vec![customer("d-1", "ada@example.com")]).await;
        let rule = DuplicationKeyRule::new(
            &cache,
            &["email".to_string()],
            HashSet::from([EntityTypeId::from("customer")]),
            Arc::new(FieldMetadataProvider::standard()),
        );

        let incoming =
            EntityRecord::new(EntityTypeId::from("customer")).with("email", FieldValue::Null);
        assert!(rule.find_duplicates(&incoming).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_identifier_rule_resolves_through_sibling_mappings() {
        let repository = Arc::new(InMemoryRepository::new());
        let destination = DestinationSystemId::from("crm");
        repository.seed_mapping(Mapping::new(
            destination.clone(),
            MappingKey::new(
                EntityTypeId::from("customer"),
                SourceSystemId::from("legacy-erp"),
                EntityIdentifier::from("c-9"),
            ),
            EntityIdentifier::from("d-9"),
            MappingOrigin::NewEntity,
            "hash".to_string(),
            Vec::new(),
        ));

        let mappings = Arc::new(MappingDataRepository::new(repository));
        mappings.reload(&destination).await.unwrap();

        let rule = SharedIdentifierRule::new(
            EntityTypeId::from("customer"),
            vec![SourceSystemId::from("legacy-erp")],
            mappings,
            Arc::new(FieldMetadataProvider::standard()),
        );

        let incoming =
            EntityRecord::new(EntityTypeId::from("customer")).with("source_id", "c-9");
        let duplicates = rule.find_duplicates(&incoming).await.unwrap();
        assert_eq!(duplicates, vec![Duplicate::positive("d-9")]);
    }
}
