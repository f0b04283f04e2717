//! Explicit per-entity-type registration of collaborators. Everything
//! the pipeline needs for an entity type is registered up front at
//! startup; there is no runtime discovery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::info;

use mds_core::contracts::{
    CacheFeed, EntitySerializer, Feed, Merger, MetadataProvider, Preprocessor, Sink,
};
use mds_core::domain::{EntityTypeId, SourceSystemId};

use crate::cache::EntityCache;
use crate::homogenize::CompositeHomogenizer;

/// Everything registered for one entity type.
pub struct EntityTypeConfig {
    pub entity_type: EntityTypeId,
    pub sink: Arc<dyn Sink>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub merger: Arc<dyn Merger>,
    pub preprocessor: Arc<dyn Preprocessor>,
    pub serializer: Arc<dyn EntitySerializer>,
    pub feeds: HashMap<SourceSystemId, Arc<dyn Feed>>,
    pub cache_feed: Option<Arc<dyn CacheFeed>>,
    pub duplication_keys: Vec<String>,
    pub immutable: bool,
    pub duplicable: bool,
    pub shared_identifier_sources: Vec<SourceSystemId>,
}

impl EntityTypeConfig {
    pub fn new(
        entity_type: EntityTypeId,
        sink: Arc<dyn Sink>,
        metadata: Arc<dyn MetadataProvider>,
        merger: Arc<dyn Merger>,
        preprocessor: Arc<dyn Preprocessor>,
        serializer: Arc<dyn EntitySerializer>,
    ) -> Self {
        EntityTypeConfig {
            entity_type,
            sink,
            metadata,
            merger,
            preprocessor,
            serializer,
            feeds: HashMap::new(),
            cache_feed: None,
            duplication_keys: Vec::new(),
            immutable: false,
            duplicable: true,
            shared_identifier_sources: Vec::new(),
        }
    }

    pub fn with_feed(mut self, source_system: SourceSystemId, feed: Arc<dyn Feed>) -> Self {
        self.feeds.insert(source_system, feed);
        self
    }

    pub fn with_cache_feed(mut self, cache_feed: Arc<dyn CacheFeed>) -> Self {
        self.cache_feed = Some(cache_feed);
        self
    }

    pub fn with_duplication_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.duplication_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Immutable types are only ever created, never revisited.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Non-duplicable types skip deduplication and are always new.
    pub fn not_duplicable(mut self) -> Self {
        self.duplicable = false;
        self
    }

    pub fn with_shared_identifier_sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = SourceSystemId>,
    {
        self.shared_identifier_sources = sources.into_iter().collect();
        self
    }
}

/// A registered entity type plus its entity cache.
pub struct RegisteredEntityType {
    pub config: EntityTypeConfig,
    pub cache: Arc<EntityCache>,
}

impl RegisteredEntityType {
    pub fn feed_for(&self, source_system: &SourceSystemId) -> Option<Arc<dyn Feed>> {
        self.config.feeds.get(source_system).cloned()
    }
}

/// Registry mapping entity-type key to its registered collaborators.
pub struct EntityTypeRegistry {
    homogenizer: Arc<CompositeHomogenizer>,
    entries: HashMap<EntityTypeId, RegisteredEntityType>,
}

impl EntityTypeRegistry {
    pub fn new(homogenizer: Arc<CompositeHomogenizer>) -> Self {
        EntityTypeRegistry {
            homogenizer,
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, config: EntityTypeConfig) {
        info!(
            "Registering entity type {} ({} feeds, {} duplication keys)",
            config.entity_type,
            config.feeds.len(),
            config.duplication_keys.len()
        );
        let cache = Arc::new(EntityCache::new(
            config.entity_type.clone(),
            config.metadata.clone(),
            Arc::clone(&self.homogenizer),
        ));
        self.entries.insert(
            config.entity_type.clone(),
            RegisteredEntityType { config, cache },
        );
    }

    pub fn get(&self, entity_type: &EntityTypeId) -> Option<&RegisteredEntityType> {
        self.entries.get(entity_type)
    }

    /// The run's known entity types, gating the duplication-key rule.
    pub fn known_entity_types(&self) -> HashSet<EntityTypeId> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegisteredEntityType> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        FieldMetadataProvider, IdentityPreprocessor, InMemorySink, JsonEntitySerializer,
        LastWriteMerger,
    };

    fn config(name: &str) -> EntityTypeConfig {
        EntityTypeConfig::new(
            EntityTypeId::from(name),
            Arc::new(InMemorySink::new(EntityTypeId::from(name), "id")),
            Arc::new(FieldMetadataProvider::standard()),
            Arc::new(LastWriteMerger::new()),
            Arc::new(IdentityPreprocessor),
            Arc::new(JsonEntitySerializer),
        )
    }

    #[test]
    fn registration_is_keyed_by_entity_type() {
        let mut registry =
            EntityTypeRegistry::new(Arc::new(CompositeHomogenizer::standard()));
        registry.register(config("customer").with_duplication_keys(["email"]));
        registry.register(config("invoice").not_duplicable());

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&EntityTypeId::from("customer")).is_some());
        assert!(registry.get(&EntityTypeId::from("order")).is_none());
        assert_eq!(registry.known_entity_types().len(), 2);

        let invoice = registry.get(&EntityTypeId::from("invoice")).unwrap();
        assert!(!invoice.config.duplicable);
    }
}
