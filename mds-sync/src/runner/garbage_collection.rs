//! The garbage-collection segment runner: computes the destination
//! entities to delete from mapping state and configured policy, then
//! deletes each inside its own operation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use mds_core::common::error::Result;
use mds_core::contracts::Sink;
use mds_core::domain::{
    EntityDeletionOutcome, EntityIdentifier, EntityTypeId, MappingOrigin, MappingState,
};

use super::SegmentReport;
use crate::config::GarbageCollectionBehavior;
use crate::events::{EventDispatcher, SyncEvent};
use crate::exceptions::SegmentExceptionHandler;
use crate::mapping::MappingDataRepository;
use crate::observability::metrics;
use crate::operation::{Operation, OperationExecutive};

pub struct GarbageCollectionSegmentRunner {
    entity_type: EntityTypeId,
    sink: Arc<dyn Sink>,
    mapping_data: Arc<MappingDataRepository>,
    executive: Arc<OperationExecutive>,
    events: Arc<EventDispatcher>,
    behavior: GarbageCollectionBehavior,
}

impl GarbageCollectionSegmentRunner {
    pub fn new(
        entity_type: EntityTypeId,
        sink: Arc<dyn Sink>,
        mapping_data: Arc<MappingDataRepository>,
        executive: Arc<OperationExecutive>,
        events: Arc<EventDispatcher>,
        behavior: GarbageCollectionBehavior,
    ) -> Self {
        GarbageCollectionSegmentRunner {
            entity_type,
            sink,
            mapping_data,
            executive,
            events,
            behavior,
        }
    }

    /// The deletion candidate set: destination-existing identifiers
    /// combined with the mapping-derived Active / Inactive /
    /// InactiveCreated sets per configured behavior.
    async fn candidates(&self) -> Result<Vec<EntityIdentifier>> {
        if self.behavior == GarbageCollectionBehavior::None {
            return Ok(Vec::new());
        }

        let existing: HashSet<EntityIdentifier> = self
            .sink
            .entity_identifiers()
            .await?
            .into_iter()
            .collect();

        let active = self
            .mapping_data
            .destination_ids_where(&self.entity_type, |m| m.state == MappingState::Active);
        let inactive = self
            .mapping_data
            .destination_ids_where(&self.entity_type, |m| m.state != MappingState::Active);
        let inactive_created = self.mapping_data.destination_ids_where(&self.entity_type, |m| {
            m.state != MappingState::Active && m.origin == MappingOrigin::NewEntity
        });

        let mut candidates: Vec<EntityIdentifier> = match self.behavior {
            GarbageCollectionBehavior::None => Vec::new(),
            GarbageCollectionBehavior::DeleteCreated => {
                existing.intersection(&inactive_created).cloned().collect()
            }
            GarbageCollectionBehavior::DeleteMapped => {
                existing.intersection(&inactive).cloned().collect()
            }
            GarbageCollectionBehavior::DeleteAll => {
                existing.difference(&active).cloned().collect()
            }
        };
        candidates.sort();
        Ok(candidates)
    }

    pub async fn run(&self, handler: &mut SegmentExceptionHandler) -> Result<SegmentReport> {
        let candidates = self.candidates().await?;
        debug!(
            "Garbage collection of {} selected {} candidates",
            self.entity_type,
            candidates.len()
        );

        let mut report = SegmentReport::default();
        for id in candidates {
            self.events.dispatch(SyncEvent::DeletionProcessing {
                entity_type: self.entity_type.clone(),
                destination_id: id.clone(),
            });

            let mut operation = self.executive.begin().await?;
            let outcome = match self.delete_one(&mut operation, &id).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_destination_failure() => {
                    operation.log(format!(
                        "Destination system failure while deleting {}: {}",
                        id, e
                    ));
                    EntityDeletionOutcome::ExceptionThrown
                }
                Err(e) => {
                    let _ = self.executive.abort(operation).await;
                    return Err(e);
                }
            };
            operation.set_summary(outcome.as_str());
            self.executive.commit(operation).await?;

            self.events.dispatch(SyncEvent::DeletionProcessed {
                entity_type: self.entity_type.clone(),
                outcome,
            });
            metrics::runner::deletion(outcome);
            report.record(outcome.as_str());

            if let Some(signal) = handler.track_deletion(outcome) {
                report.aborted = Some(signal);
                break;
            }
        }

        info!(
            "Garbage collection of {} handled {} items",
            self.entity_type, report.processed
        );
        Ok(report)
    }

    async fn delete_one(
        &self,
        operation: &mut Operation,
        id: &EntityIdentifier,
    ) -> Result<EntityDeletionOutcome> {
        match self.sink.get(id).await? {
            None => {
                operation.log(format!("Destination entity {} already absent", id));
                Ok(EntityDeletionOutcome::NotFound)
            }
            Some(entity) => {
                self.sink.delete(&entity).await?;
                operation.log(format!("Deleted destination entity {}", id));
                Ok(EntityDeletionOutcome::Deleted)
            }
        }
    }
}
