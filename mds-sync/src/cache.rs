//! In-memory, multi-index store of destination entities for one entity
//! type. Populated once per run segment from a cache feed; kept
//! consistent as entities are created or updated during the run by
//! reindexing on every observed write. Index keys are homogenized, never
//! the raw values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use mds_core::common::error::{Result, SyncError};
use mds_core::contracts::{CacheFeed, MetadataProvider};
use mds_core::domain::{EntityIdentifier, EntityRecord, EntityTypeId, FieldValue};

use crate::events::SyncListener;
use crate::homogenize::CompositeHomogenizer;

/// Extracts the raw (pre-homogenization) value an index is keyed on.
pub type ValueGetter = Arc<dyn Fn(&EntityRecord) -> Option<FieldValue> + Send + Sync>;

struct IndexState {
    name: String,
    getter: ValueGetter,
    /// Homogenized value -> destination identifiers currently holding it.
    buckets: HashMap<FieldValue, Vec<EntityIdentifier>>,
    /// Which bucket each entity currently occupies, for invalidation.
    occupancy: HashMap<EntityIdentifier, FieldValue>,
}

impl IndexState {
    fn remove(&mut self, id: &EntityIdentifier) {
        if let Some(key) = self.occupancy.remove(id) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.retain(|existing| existing != id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    fn insert(&mut self, id: EntityIdentifier, key: FieldValue) {
        self.buckets
            .entry(key.clone())
            .or_default()
            .push(id.clone());
        self.occupancy.insert(id, key);
    }
}

#[derive(Default)]
struct CacheInner {
    populated: bool,
    entities: HashMap<EntityIdentifier, EntityRecord>,
    indices: Vec<IndexState>,
}

/// The destination entity cache for one entity type.
pub struct EntityCache {
    entity_type: EntityTypeId,
    metadata: Arc<dyn MetadataProvider>,
    homogenizer: Arc<CompositeHomogenizer>,
    inner: Mutex<CacheInner>,
}

impl EntityCache {
    pub fn new(
        entity_type: EntityTypeId,
        metadata: Arc<dyn MetadataProvider>,
        homogenizer: Arc<CompositeHomogenizer>,
    ) -> Self {
        EntityCache {
            entity_type,
            metadata,
            homogenizer,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    pub fn is_populated(&self) -> bool {
        self.inner.lock().unwrap().populated
    }

    /// Load all destination entities from the cache feed, replacing any
    /// previous population. With no feed registered the cache stays
    /// unpopulated and indexing is skipped entirely.
    pub async fn populate(&self, feed: Option<&Arc<dyn CacheFeed>>) -> Result<usize> {
        let Some(feed) = feed else {
            debug!(
                "No cache feed for entity type {}; cache stays unpopulated",
                self.entity_type
            );
            return Ok(0);
        };

        let entities = feed.load_entities().await?;

        let mut inner = self.inner.lock().unwrap();
        inner.entities.clear();
        for index in &mut inner.indices {
            index.buckets.clear();
            index.occupancy.clear();
        }

        let count = entities.len();
        for entity in entities {
            let id = self.metadata.destination_identifier(&entity).ok_or_else(|| {
                SyncError::contract(format!(
                    "cache feed returned {} entity without destination identifier",
                    self.entity_type
                ))
            })?;
            Self::reindex_locked(&mut inner, &self.homogenizer, id.clone(), &entity);
            inner.entities.insert(id, entity);
        }
        inner.populated = true;
        debug!("Cached {} {} entities", count, self.entity_type);
        Ok(count)
    }

    /// Register a named secondary index. Idempotent by name: asking for
    /// an index that already exists returns a handle to it. Entities
    /// already cached are indexed immediately.
    pub fn create_index(
        self: &Arc<Self>,
        name: impl Into<String>,
        getter: ValueGetter,
    ) -> CacheIndexHandle {
        let name = name.into();
        let mut inner = self.inner.lock().unwrap();
        if let Some(position) = inner.indices.iter().position(|i| i.name == name) {
            return CacheIndexHandle {
                cache: Arc::clone(self),
                index: position,
            };
        }

        let mut index = IndexState {
            name,
            getter,
            buckets: HashMap::new(),
            occupancy: HashMap::new(),
        };
        for (id, entity) in &inner.entities {
            if let Some(raw) = (index.getter)(entity).filter(|v| !v.is_null()) {
                index.insert(id.clone(), self.homogenizer.homogenize(raw));
            }
        }
        inner.indices.push(index);
        CacheIndexHandle {
            cache: Arc::clone(self),
            index: inner.indices.len() - 1,
        }
    }

    /// All cached entities. Calling this before population is a contract
    /// violation.
    pub fn get_all(&self) -> Result<Vec<EntityRecord>> {
        let inner = self.inner.lock().unwrap();
        if !inner.populated {
            return Err(SyncError::contract(format!(
                "entity cache for {} read before population",
                self.entity_type
            )));
        }
        Ok(inner.entities.values().cloned().collect())
    }

    /// Record a destination-side create or update. The entity is removed
    /// from every index list it previously occupied and re-inserted with
    /// freshly computed, homogenized values, since an update may change
    /// any indexed value.
    pub fn entity_created_or_updated(&self, entity: &EntityRecord) {
        if entity.entity_type() != &self.entity_type {
            return;
        }
        let Some(id) = self.metadata.destination_identifier(entity) else {
            warn!(
                "Ignoring {} write without destination identifier",
                self.entity_type
            );
            return;
        };

        let mut inner = self.inner.lock().unwrap();
        if !inner.populated {
            return;
        }
        Self::reindex_locked(&mut inner, &self.homogenizer, id.clone(), entity);
        inner.entities.insert(id, entity.clone());
    }

    fn reindex_locked(
        inner: &mut CacheInner,
        homogenizer: &CompositeHomogenizer,
        id: EntityIdentifier,
        entity: &EntityRecord,
    ) {
        for index in &mut inner.indices {
            index.remove(&id);
            // A null raw value excludes the entity from this index:
            // absence, not an empty-string key.
            if let Some(raw) = (index.getter)(entity).filter(|v| !v.is_null()) {
                index.insert(id.clone(), homogenizer.homogenize(raw));
            }
        }
    }

    fn get_entities_at(&self, index: usize, value: &FieldValue) -> Vec<EntityRecord> {
        let inner = self.inner.lock().unwrap();
        let key = self.homogenizer.homogenize(value.clone());
        let Some(index) = inner.indices.get(index) else {
            return Vec::new();
        };
        index
            .buckets
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.entities.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The cache reindexes on every destination write it observes.
impl SyncListener for EntityCache {
    fn on_event(&self, _event: &crate::events::SyncEvent) {}

    fn on_entity_written(&self, entity: &EntityRecord) {
        self.entity_created_or_updated(entity);
    }
}

/// Handle to one named index; lookups homogenize the probe value before
/// matching, so callers pass raw values.
#[derive(Clone)]
pub struct CacheIndexHandle {
    cache: Arc<EntityCache>,
    index: usize,
}

impl CacheIndexHandle {
    pub fn get_entities(&self, value: &FieldValue) -> Vec<EntityRecord> {
        self.cache.get_entities_at(self.index, value)
    }
}
