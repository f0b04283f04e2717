//! Contracts the engine consumes per entity type. Implementations are
//! supplied externally (or from the built-in collaborators); the core
//! only orchestrates calls through these seams.

use async_trait::async_trait;

use crate::common::error::Result;
use crate::domain::{EntityIdentifier, EntityRecord, ValueChange};

/// Result of one bulk source load.
#[derive(Debug, Clone)]
pub struct FeedBatch {
    pub entities: Vec<EntityRecord>,
    /// Total reported by the source, which may exceed `entities.len()`
    /// when the source pages or filters server-side.
    pub total: usize,
}

impl FeedBatch {
    pub fn new(entities: Vec<EntityRecord>) -> Self {
        let total = entities.len();
        FeedBatch { entities, total }
    }
}

/// Bulk source of entities for one migration segment.
#[async_trait]
pub trait Feed: Send + Sync {
    async fn load_entities(&self) -> Result<FeedBatch>;
}

/// Destination-system access for one entity type. Every method may fail
/// with a destination-system error, which the engine converts into a
/// per-entity `ExceptionThrown` outcome.
#[async_trait]
pub trait Sink: Send + Sync {
    /// A blank destination entity to merge new source content into.
    async fn new_entity(&self) -> Result<EntityRecord>;

    /// Persist a new entity; the returned record carries the
    /// destination-assigned identifier.
    async fn create(&self, entity: EntityRecord) -> Result<EntityRecord>;

    async fn get(&self, id: &EntityIdentifier) -> Result<Option<EntityRecord>>;

    async fn update(&self, entity: &EntityRecord) -> Result<()>;

    async fn delete(&self, entity: &EntityRecord) -> Result<()>;

    /// All destination identifiers currently present. Used only by
    /// garbage collection.
    async fn entity_identifiers(&self) -> Result<Vec<EntityIdentifier>>;
}

/// Optional bulk loader backing the in-memory entity cache.
#[async_trait]
pub trait CacheFeed: Send + Sync {
    async fn load_entities(&self) -> Result<Vec<EntityRecord>>;
}

/// Extracts identifiers and a display label from an entity instance.
/// Identifiers must be stable for the lifetime of a given in-memory
/// instance; drift between calls is a contract violation.
pub trait MetadataProvider: Send + Sync {
    fn source_identifier(&self, entity: &EntityRecord) -> Option<EntityIdentifier>;

    fn destination_identifier(&self, entity: &EntityRecord) -> Option<EntityIdentifier>;

    fn label(&self, entity: &EntityRecord) -> String;
}

/// Three-way merge: `trunk` is the live destination entity (mutated in
/// place), `previous` the last persisted source snapshot if one exists,
/// `current` the incoming source entity. Returns the field-level changes
/// actually applied to the trunk.
pub trait Merger: Send + Sync {
    fn merge(
        &self,
        trunk: &mut EntityRecord,
        previous: Option<&EntityRecord>,
        current: &EntityRecord,
    ) -> Result<Vec<ValueChange>>;
}

/// Result of preprocessing one entity.
#[derive(Debug, Clone)]
pub enum Preprocessed {
    Accepted(EntityRecord),
    Rejected { reason: String },
}

/// Entity transform plus accept/reject decision, applied to entities of
/// both source and destination origin before further processing.
pub trait Preprocessor: Send + Sync {
    fn apply(&self, entity: EntityRecord) -> Result<Preprocessed>;
}

/// Deterministic byte snapshot and content hash of an entity, used for
/// change detection and for durable storage of last-known source content.
pub trait EntitySerializer: Send + Sync {
    fn serialize(&self, entity: &EntityRecord) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<EntityRecord>;

    fn content_hash(&self, entity: &EntityRecord) -> Result<String>;
}
