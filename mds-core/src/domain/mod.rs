pub mod entity;
pub mod mapping;
pub mod operation;
pub mod outcome;

pub use entity::{
    DestinationSystemId, EntityIdentifier, EntityRecord, EntityTypeId, FieldValue,
    SourceSystemId, ValueChange,
};
pub use mapping::{Mapping, MappingKey, MappingOrigin, MappingSet, MappingState};
pub use operation::{LogEntry, OperationRecord};
pub use outcome::{
    DeduplicationResult, Duplicate, EntityDeletionOutcome, EntityTransaction,
    EntityTransactionOutcome, MatchWeight,
};
