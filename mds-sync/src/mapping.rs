//! The identity-mapping subsystem. `MappingDataRepository` keeps an
//! in-process cache of all mappings for one destination system, reused
//! across consecutive segments targeting the same destination and
//! reloaded only when it changes. `MappingStore` layers typed entity
//! snapshot handling on top for one (entity type, source system) pair.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use mds_core::common::error::{Result, SyncError};
use mds_core::contracts::EntitySerializer;
use mds_core::domain::{
    DestinationSystemId, EntityIdentifier, EntityRecord, EntityTypeId, Mapping, MappingKey,
    MappingOrigin, MappingSet, MappingState, SourceSystemId,
};
use mds_core::storage::Repository;

use crate::operation::Operation;

/// Result of `ensure_loaded`: whether a reload actually happened.
#[derive(Debug, Clone, Copy)]
pub struct ReloadOutcome {
    pub reloaded: bool,
    pub count: usize,
}

struct CacheState {
    destination_system: Option<DestinationSystemId>,
    by_key: HashMap<MappingKey, Mapping>,
}

/// In-process mapping cache for one destination system, backed by the
/// durable repository. Lookups are pure; writes go through the active
/// operation's unit of work and the in-memory index in one step.
pub struct MappingDataRepository {
    repository: Arc<dyn Repository>,
    state: Mutex<CacheState>,
}

impl MappingDataRepository {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        MappingDataRepository {
            repository,
            state: Mutex::new(CacheState {
                destination_system: None,
                by_key: HashMap::new(),
            }),
        }
    }

    pub fn needs_reload(&self, destination_system: &DestinationSystemId) -> bool {
        self.state.lock().unwrap().destination_system.as_ref() != Some(destination_system)
    }

    /// Load the mapping population for `destination_system`, replacing
    /// whatever was cached before.
    pub async fn reload(&self, destination_system: &DestinationSystemId) -> Result<usize> {
        let mappings = self.repository.load_mappings(destination_system).await?;
        let count = mappings.len();
        let mut state = self.state.lock().unwrap();
        state.by_key = mappings.into_iter().map(|m| (m.key.clone(), m)).collect();
        state.destination_system = Some(destination_system.clone());
        debug!("Mapping cache holds {} mappings for {}", count, destination_system);
        Ok(count)
    }

    /// Reload only if the destination system changed since the last
    /// load; consecutive segments against the same destination reuse the
    /// cache.
    pub async fn ensure_loaded(
        &self,
        destination_system: &DestinationSystemId,
    ) -> Result<ReloadOutcome> {
        if !self.needs_reload(destination_system) {
            let count = self.state.lock().unwrap().by_key.len();
            return Ok(ReloadOutcome {
                reloaded: false,
                count,
            });
        }
        let count = self.reload(destination_system).await?;
        Ok(ReloadOutcome {
            reloaded: true,
            count,
        })
    }

    /// Pure lookup; absence means unmapped.
    pub fn get(&self, key: &MappingKey) -> Option<Mapping> {
        self.state.lock().unwrap().by_key.get(key).cloned()
    }

    /// Persist a new mapping through the operation's unit of work and
    /// insert it into the in-memory index in the same step. At most one
    /// non-removed mapping may exist per key.
    pub async fn create(&self, operation: &mut Operation, mapping: Mapping) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if let Some(existing) = state.by_key.get(&mapping.key) {
                if existing.state != MappingState::Removed {
                    return Err(SyncError::contract(format!(
                        "a non-removed mapping already exists for {:?}",
                        mapping.key
                    )));
                }
            }
        }
        operation.uow_mut().insert_mapping(&mapping).await?;
        self.state
            .lock()
            .unwrap()
            .by_key
            .insert(mapping.key.clone(), mapping);
        Ok(())
    }

    /// Persist a changed mapping and update the in-memory index.
    pub async fn persist_update(&self, operation: &mut Operation, mapping: Mapping) -> Result<()> {
        operation.uow_mut().update_mapping(&mapping).await?;
        self.state
            .lock()
            .unwrap()
            .by_key
            .insert(mapping.key.clone(), mapping);
        Ok(())
    }

    /// Mappings for one (entity type, source system) pair, filtered by
    /// set membership.
    pub fn mappings_in(
        &self,
        entity_type: &EntityTypeId,
        source_system: &SourceSystemId,
        set: MappingSet,
    ) -> Vec<Mapping> {
        self.state
            .lock()
            .unwrap()
            .by_key
            .values()
            .filter(|m| {
                &m.key.entity_type == entity_type
                    && &m.key.source_system == source_system
                    && m.in_set(set)
            })
            .cloned()
            .collect()
    }

    /// Destination identifiers of mappings for one entity type matching
    /// a predicate, across all source systems. Used by garbage
    /// collection to build its candidate sets.
    pub fn destination_ids_where(
        &self,
        entity_type: &EntityTypeId,
        predicate: impl Fn(&Mapping) -> bool,
    ) -> HashSet<EntityIdentifier> {
        self.state
            .lock()
            .unwrap()
            .by_key
            .values()
            .filter(|m| &m.key.entity_type == entity_type && predicate(m))
            .map(|m| m.destination_entity_id.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().by_key.len()
    }
}

/// Typed mapping access for one (entity type, source system) pair:
/// serializes snapshots, computes content hashes, and drives lifecycle
/// transitions.
pub struct MappingStore {
    data: Arc<MappingDataRepository>,
    serializer: Arc<dyn EntitySerializer>,
    destination_system: DestinationSystemId,
    entity_type: EntityTypeId,
    source_system: SourceSystemId,
}

impl MappingStore {
    pub fn new(
        data: Arc<MappingDataRepository>,
        serializer: Arc<dyn EntitySerializer>,
        destination_system: DestinationSystemId,
        entity_type: EntityTypeId,
        source_system: SourceSystemId,
    ) -> Self {
        MappingStore {
            data,
            serializer,
            destination_system,
            entity_type,
            source_system,
        }
    }

    fn key_for(&self, source_id: &EntityIdentifier) -> MappingKey {
        MappingKey::new(
            self.entity_type.clone(),
            self.source_system.clone(),
            source_id.clone(),
        )
    }

    pub fn get_mapping(&self, source_id: &EntityIdentifier) -> Option<Mapping> {
        self.data.get(&self.key_for(source_id))
    }

    pub fn content_hash(&self, entity: &EntityRecord) -> Result<String> {
        self.serializer.content_hash(entity)
    }

    /// Deserialize the last persisted source snapshot.
    pub fn load_entity(&self, mapping: &Mapping) -> Result<EntityRecord> {
        self.serializer.deserialize(&mapping.snapshot)
    }

    /// Create and persist a mapping for a freshly classified entity,
    /// snapshotting its current content.
    pub async fn create_mapping(
        &self,
        operation: &mut Operation,
        source_id: &EntityIdentifier,
        destination_id: EntityIdentifier,
        origin: MappingOrigin,
        entity: &EntityRecord,
    ) -> Result<Mapping> {
        let snapshot = self.serializer.serialize(entity)?;
        let hash = self.serializer.content_hash(entity)?;
        let mapping = Mapping::new(
            self.destination_system.clone(),
            self.key_for(source_id),
            destination_id,
            origin,
            hash,
            snapshot,
        );
        self.data.create(operation, mapping.clone()).await?;
        Ok(mapping)
    }

    /// Advance the persisted snapshot to the new source content,
    /// invalidating the previous hash.
    pub async fn update_entity(
        &self,
        operation: &mut Operation,
        mapping: &Mapping,
        entity: &EntityRecord,
    ) -> Result<Mapping> {
        let mut updated = mapping.clone();
        updated.snapshot = self.serializer.serialize(entity)?;
        updated.entity_hash = self.serializer.content_hash(entity)?;
        self.data.persist_update(operation, updated.clone()).await?;
        Ok(updated)
    }

    /// Persist a lifecycle transition. Illegal transitions are contract
    /// errors.
    pub async fn set_state(
        &self,
        operation: &mut Operation,
        mapping: &Mapping,
        state: MappingState,
    ) -> Result<Mapping> {
        if !mapping.state.can_transition_to(state) {
            return Err(SyncError::contract(format!(
                "mapping {} may not move from {:?} to {:?}",
                mapping.id, mapping.state, state
            )));
        }
        let mut updated = mapping.clone();
        updated.state = state;
        self.data.persist_update(operation, updated.clone()).await?;
        Ok(updated)
    }

    /// Mappings scoped to this store's entity type and source system.
    pub fn mappings(&self, set: MappingSet) -> Vec<Mapping> {
        self.data
            .mappings_in(&self.entity_type, &self.source_system, set)
    }
}
