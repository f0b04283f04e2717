use serde::{Deserialize, Serialize};

use super::entity::{EntityIdentifier, ValueChange};

/// Confidence tag on a duplicate candidate. Ordered so that
/// `Inconsistent` dominates `Positive`: a conflicting signal for a
/// destination entity always outweighs a confident one when both are
/// reported for the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchWeight {
    Positive,
    Inconsistent,
}

/// One duplicate candidate produced by a duplication rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duplicate {
    pub destination_id: EntityIdentifier,
    pub weight: MatchWeight,
}

impl Duplicate {
    pub fn positive(destination_id: impl Into<EntityIdentifier>) -> Self {
        Duplicate {
            destination_id: destination_id.into(),
            weight: MatchWeight::Positive,
        }
    }

    pub fn inconsistent(destination_id: impl Into<EntityIdentifier>) -> Self {
        Duplicate {
            destination_id: destination_id.into(),
            weight: MatchWeight::Inconsistent,
        }
    }
}

/// Classification of a source entity against the destination population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeduplicationResult {
    NewEntity,
    DuplicateFound(EntityIdentifier),
    ManualInspectionRequired(Vec<Duplicate>),
}

/// Outcome of processing one source entity. Emitted exactly once per
/// processed entity and immutable from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityTransactionOutcome {
    Skipped,
    Rejected,
    NoChangesDetected,
    NoChangesMerged,
    ChangesDetectedAndMerged,
    NotFoundInDestinationSystem,
    DuplicateDetectedChangesMerged,
    DuplicateDetectedNoChangesMerged,
    ReferredForManualDeduplication,
    NewEntityCreated,
    ExceptionThrown,
}

impl EntityTransactionOutcome {
    pub fn is_exception(self) -> bool {
        self == EntityTransactionOutcome::ExceptionThrown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityTransactionOutcome::Skipped => "skipped",
            EntityTransactionOutcome::Rejected => "rejected",
            EntityTransactionOutcome::NoChangesDetected => "no_changes_detected",
            EntityTransactionOutcome::NoChangesMerged => "no_changes_merged",
            EntityTransactionOutcome::ChangesDetectedAndMerged => "changes_detected_and_merged",
            EntityTransactionOutcome::NotFoundInDestinationSystem => {
                "not_found_in_destination_system"
            }
            EntityTransactionOutcome::DuplicateDetectedChangesMerged => {
                "duplicate_detected_changes_merged"
            }
            EntityTransactionOutcome::DuplicateDetectedNoChangesMerged => {
                "duplicate_detected_no_changes_merged"
            }
            EntityTransactionOutcome::ReferredForManualDeduplication => {
                "referred_for_manual_deduplication"
            }
            EntityTransactionOutcome::NewEntityCreated => "new_entity_created",
            EntityTransactionOutcome::ExceptionThrown => "exception_thrown",
        }
    }
}

/// Outcome of one garbage-collection deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityDeletionOutcome {
    Deleted,
    NotFound,
    ExceptionThrown,
}

impl EntityDeletionOutcome {
    pub fn is_exception(self) -> bool {
        self == EntityDeletionOutcome::ExceptionThrown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityDeletionOutcome::Deleted => "deleted",
            EntityDeletionOutcome::NotFound => "not_found",
            EntityDeletionOutcome::ExceptionThrown => "exception_thrown",
        }
    }
}

/// The full result of one entity transaction: the outcome plus whatever
/// the processor had resolved by the time it finished, preserved for
/// logging even when the outcome is `ExceptionThrown`.
#[derive(Debug, Clone)]
pub struct EntityTransaction {
    pub outcome: EntityTransactionOutcome,
    pub source_entity_id: Option<EntityIdentifier>,
    pub entity_label: Option<String>,
    pub changes: Vec<ValueChange>,
    pub error: Option<String>,
}

impl EntityTransaction {
    pub fn new(outcome: EntityTransactionOutcome) -> Self {
        EntityTransaction {
            outcome,
            source_entity_id: None,
            entity_label: None,
            changes: Vec::new(),
            error: None,
        }
    }

    pub fn with_source_id(mut self, id: EntityIdentifier) -> Self {
        self.source_entity_id = Some(id);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.entity_label = Some(label.into());
        self
    }

    pub fn with_changes(mut self, changes: Vec<ValueChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistent_outweighs_positive() {
        assert!(MatchWeight::Inconsistent > MatchWeight::Positive);
        assert_eq!(
            MatchWeight::Positive.max(MatchWeight::Inconsistent),
            MatchWeight::Inconsistent
        );
    }

    #[test]
    fn exception_outcomes_are_flagged() {
        assert!(EntityTransactionOutcome::ExceptionThrown.is_exception());
        assert!(!EntityTransactionOutcome::NewEntityCreated.is_exception());
        assert!(EntityDeletionOutcome::ExceptionThrown.is_exception());
        assert!(!EntityDeletionOutcome::Deleted.is_exception());
    }
}
