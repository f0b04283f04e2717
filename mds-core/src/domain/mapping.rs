use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{DestinationSystemId, EntityIdentifier, EntityTypeId, SourceSystemId};

/// How a mapping came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingOrigin {
    /// The source entity was created fresh in the destination system.
    NewEntity,
    /// The source entity was matched to a pre-existing destination entity.
    Deduplication,
}

/// Lifecycle state of a mapping. Transitions only move forward, except
/// that a deactivated mapping can be reactivated. `Removed` is terminal;
/// mappings are never physically destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingState {
    Active,
    Deactivated,
    Removed,
}

impl MappingState {
    pub fn can_transition_to(self, next: MappingState) -> bool {
        match (self, next) {
            (MappingState::Active, MappingState::Deactivated) => true,
            (MappingState::Active, MappingState::Removed) => true,
            (MappingState::Deactivated, MappingState::Active) => true,
            (MappingState::Deactivated, MappingState::Removed) => true,
            (MappingState::Removed, _) => false,
            (a, b) => a == b,
        }
    }
}

/// Which slice of the mapping population a query wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSet {
    /// Active and deactivated mappings.
    NonRemoved,
    /// Active mappings only.
    ActiveOnly,
}

/// The natural key of a mapping: at most one mapping per (entity type,
/// source system, source entity id) is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingKey {
    pub entity_type: EntityTypeId,
    pub source_system: SourceSystemId,
    pub source_entity_id: EntityIdentifier,
}

impl MappingKey {
    pub fn new(
        entity_type: EntityTypeId,
        source_system: SourceSystemId,
        source_entity_id: EntityIdentifier,
    ) -> Self {
        MappingKey {
            entity_type,
            source_system,
            source_entity_id,
        }
    }
}

/// The persistent 1:1 association between a source entity and its
/// destination counterpart, with lifecycle state and a content hash of
/// the last persisted source snapshot for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub id: Uuid,
    pub destination_system: DestinationSystemId,
    pub key: MappingKey,
    pub destination_entity_id: EntityIdentifier,
    pub origin: MappingOrigin,
    pub state: MappingState,
    pub entity_hash: String,
    /// Serialized snapshot of the last persisted source entity content;
    /// deserialized as the "previous" side of three-way merges.
    pub snapshot: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    pub fn new(
        destination_system: DestinationSystemId,
        key: MappingKey,
        destination_entity_id: EntityIdentifier,
        origin: MappingOrigin,
        entity_hash: String,
        snapshot: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Mapping {
            id: Uuid::new_v4(),
            destination_system,
            key,
            destination_entity_id,
            origin,
            state: MappingState::Active,
            entity_hash,
            snapshot,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == MappingState::Active
    }

    pub fn in_set(&self, set: MappingSet) -> bool {
        match set {
            MappingSet::NonRemoved => self.state != MappingState::Removed,
            MappingSet::ActiveOnly => self.state == MappingState::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_with_state(state: MappingState) -> Mapping {
        let mut mapping = Mapping::new(
            DestinationSystemId::from("crm"),
            MappingKey::new(
                EntityTypeId::from("customer"),
                SourceSystemId::from("erp"),
                EntityIdentifier::from("c-1"),
            ),
            EntityIdentifier::from("dest-1"),
            MappingOrigin::NewEntity,
            "hash".to_string(),
            Vec::new(),
        );
        mapping.state = state;
        mapping
    }

    #[test]
    fn removed_is_terminal() {
        assert!(!MappingState::Removed.can_transition_to(MappingState::Active));
        assert!(!MappingState::Removed.can_transition_to(MappingState::Deactivated));
    }

    #[test]
    fn deactivated_can_reactivate() {
        assert!(MappingState::Deactivated.can_transition_to(MappingState::Active));
        assert!(MappingState::Active.can_transition_to(MappingState::Deactivated));
    }

    #[test]
    fn set_membership() {
        assert!(mapping_with_state(MappingState::Active).in_set(MappingSet::ActiveOnly));
        assert!(mapping_with_state(MappingState::Active).in_set(MappingSet::NonRemoved));
        assert!(!mapping_with_state(MappingState::Deactivated).in_set(MappingSet::ActiveOnly));
        assert!(mapping_with_state(MappingState::Deactivated).in_set(MappingSet::NonRemoved));
        assert!(!mapping_with_state(MappingState::Removed).in_set(MappingSet::NonRemoved));
    }
}
