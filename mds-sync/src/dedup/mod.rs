//! Deduplication: pluggable rules produce weighted duplicate candidates,
//! and the deduplicator resolves them into a classification of the
//! incoming entity.

pub mod rules;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mds_core::common::error::Result;
use mds_core::domain::{
    DeduplicationResult, Duplicate, EntityIdentifier, EntityRecord, MatchWeight,
};

use crate::observability::metrics;

pub use rules::{DuplicationKeyRule, SharedIdentifierRule};

/// One strategy for finding destination matches of a source entity.
/// Rules run in isolation from any enclosing transactional context; a
/// rule's own side effects must not leak into the current operation.
#[async_trait]
pub trait DuplicationRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find_duplicates(&self, entity: &EntityRecord) -> Result<Vec<Duplicate>>;
}

/// Aggregates all rules' candidates and applies the decision policy.
pub struct Deduplicator {
    rules: Vec<Arc<dyn DuplicationRule>>,
}

impl Deduplicator {
    pub fn new(rules: Vec<Arc<dyn DuplicationRule>>) -> Self {
        Deduplicator { rules }
    }

    /// Classify `entity` against the destination population.
    ///
    /// Per destination id the maximum weight observed across all rules
    /// wins, `Inconsistent` being greater than `Positive`. Decision
    /// policy, in order: no candidates is a new entity; any inconsistent
    /// candidate forces manual inspection; exactly one positive
    /// candidate is a duplicate; anything else goes to manual
    /// inspection.
    pub async fn deduplicate(&self, entity: &EntityRecord) -> Result<DeduplicationResult> {
        let mut weights: HashMap<EntityIdentifier, MatchWeight> = HashMap::new();
        for rule in &self.rules {
            let found = rule.find_duplicates(entity).await?;
            debug!("Rule {} produced {} candidates", rule.name(), found.len());
            for duplicate in found {
                weights
                    .entry(duplicate.destination_id)
                    .and_modify(|weight| *weight = (*weight).max(duplicate.weight))
                    .or_insert(duplicate.weight);
            }
        }

        if weights.is_empty() {
            metrics::dedup::new_entity();
            return Ok(DeduplicationResult::NewEntity);
        }

        let mut candidates: Vec<Duplicate> = weights
            .into_iter()
            .map(|(destination_id, weight)| Duplicate {
                destination_id,
                weight,
            })
            .collect();
        candidates.sort_by(|a, b| a.destination_id.cmp(&b.destination_id));

        let inconsistent = candidates
            .iter()
            .any(|c| c.weight == MatchWeight::Inconsistent);
        let positives: Vec<&Duplicate> = candidates
            .iter()
            .filter(|c| c.weight == MatchWeight::Positive)
            .collect();

        if !inconsistent && positives.len() == 1 {
            let id = positives[0].destination_id.clone();
            metrics::dedup::duplicate_found();
            return Ok(DeduplicationResult::DuplicateFound(id));
        }

        metrics::dedup::manual_inspection_required();
        Ok(DeduplicationResult::ManualInspectionRequired(candidates))
    }
}
