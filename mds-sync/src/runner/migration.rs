//! The migration segment runner: loads one batch of source entities,
//! drives the processor over each inside its own operation, then
//! reconciles orphaned mappings per configured policy.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use mds_core::common::error::Result;
use mds_core::contracts::{Feed, MetadataProvider};
use mds_core::domain::{
    EntityIdentifier, EntityTypeId, Mapping, MappingSet, MappingState, SourceSystemId,
};

use super::SegmentReport;
use crate::config::OrphanMappingBehavior;
use crate::events::{EventDispatcher, SyncEvent};
use crate::exceptions::SegmentExceptionHandler;
use crate::mapping::MappingStore;
use crate::observability::metrics;
use crate::operation::OperationExecutive;
use crate::processor::Processor;

pub struct MigrationSegmentRunner {
    entity_type: EntityTypeId,
    source_system: SourceSystemId,
    feed: Arc<dyn Feed>,
    metadata: Arc<dyn MetadataProvider>,
    processor: Processor,
    mappings: Arc<MappingStore>,
    executive: Arc<OperationExecutive>,
    events: Arc<EventDispatcher>,
    orphan_behavior: OrphanMappingBehavior,
}

impl MigrationSegmentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_type: EntityTypeId,
        source_system: SourceSystemId,
        feed: Arc<dyn Feed>,
        metadata: Arc<dyn MetadataProvider>,
        processor: Processor,
        mappings: Arc<MappingStore>,
        executive: Arc<OperationExecutive>,
        events: Arc<EventDispatcher>,
        orphan_behavior: OrphanMappingBehavior,
    ) -> Self {
        MigrationSegmentRunner {
            entity_type,
            source_system,
            feed,
            metadata,
            processor,
            mappings,
            executive,
            events,
            orphan_behavior,
        }
    }

    pub async fn run(&self, handler: &mut SegmentExceptionHandler) -> Result<SegmentReport> {
        self.events.dispatch(SyncEvent::LoadingEntities {
            entity_type: self.entity_type.clone(),
            source_system: self.source_system.clone(),
        });
        let batch = self.feed.load_entities().await?;
        self.events.dispatch(SyncEvent::EntitiesLoaded {
            entity_type: self.entity_type.clone(),
            source_system: self.source_system.clone(),
            count: batch.entities.len(),
        });

        // Every mapping in this snapshot that the batch does not revisit
        // is an orphan afterwards.
        let mut orphans = self.orphan_candidates();
        debug!(
            "Tracking {} orphan candidates for {} from {}",
            orphans.len(),
            self.entity_type,
            self.source_system
        );

        let mut report = SegmentReport::default();
        for entity in batch.entities {
            self.events.dispatch(SyncEvent::EntityProcessing {
                entity_type: self.entity_type.clone(),
                label: self.metadata.label(&entity),
            });

            let mut operation = self.executive.begin().await?;
            let transaction = match self.processor.process(&mut operation, entity).await {
                Ok(transaction) => transaction,
                Err(e) => {
                    let _ = self.executive.abort(operation).await;
                    return Err(e);
                }
            };
            if let Some(source_id) = &transaction.source_entity_id {
                orphans.remove(source_id);
            }
            operation.set_summary(transaction.outcome.as_str());
            self.executive.commit(operation).await?;

            self.events.dispatch(SyncEvent::EntityProcessed {
                entity_type: self.entity_type.clone(),
                outcome: transaction.outcome,
            });
            report.record(transaction.outcome.as_str());

            if let Some(signal) = handler.track_transaction(transaction.outcome) {
                report.aborted = Some(signal);
                break;
            }
        }

        // An aborted segment left part of the feed unprocessed; those
        // mappings must not be treated as orphans.
        if report.aborted.is_none() {
            self.reconcile_orphans(orphans, &mut report).await?;
        }

        info!(
            "Migration of {} from {} handled {} items",
            self.entity_type, self.source_system, report.processed
        );
        Ok(report)
    }

    fn orphan_candidates(&self) -> HashMap<EntityIdentifier, Mapping> {
        let mappings = match self.orphan_behavior {
            OrphanMappingBehavior::None => return HashMap::new(),
            OrphanMappingBehavior::Deactivate => self.mappings.mappings(MappingSet::ActiveOnly),
            OrphanMappingBehavior::Remove => self.mappings.mappings(MappingSet::NonRemoved),
        };
        mappings
            .into_iter()
            .map(|m| (m.key.source_entity_id.clone(), m))
            .collect()
    }

    async fn reconcile_orphans(
        &self,
        orphans: HashMap<EntityIdentifier, Mapping>,
        report: &mut SegmentReport,
    ) -> Result<()> {
        let (target_state, summary) = match self.orphan_behavior {
            OrphanMappingBehavior::None => return Ok(()),
            OrphanMappingBehavior::Deactivate => (MappingState::Deactivated, "orphan_deactivated"),
            OrphanMappingBehavior::Remove => (MappingState::Removed, "orphan_removed"),
        };

        for mapping in orphans.into_values() {
            self.events.dispatch(SyncEvent::OrphanMappingProcessing {
                entity_type: self.entity_type.clone(),
                mapping_id: mapping.id,
            });

            let mut operation = self.executive.begin().await?;
            operation.log(format!(
                "Source entity {} was not in the current batch",
                mapping.key.source_entity_id
            ));
            self.mappings
                .set_state(&mut operation, &mapping, target_state)
                .await?;
            operation.set_summary(summary);
            self.executive.commit(operation).await?;

            self.events.dispatch(SyncEvent::OrphanMappingProcessed {
                entity_type: self.entity_type.clone(),
                mapping_id: mapping.id,
                state: target_state,
            });
            metrics::runner::orphan_reconciled();
            report.record(summary);
        }
        Ok(())
    }
}
