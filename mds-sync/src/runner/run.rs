//! The run driver: executes configured segments sequentially against
//! one shared mapping cache and exception monitor, honoring abort
//! signals as controlled stops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use mds_core::common::error::{Result, SyncError};
use mds_core::domain::{EntityTypeId, SourceSystemId};
use mds_core::storage::Repository;

use super::{
    GarbageCollectionSegmentRunner, MigrationSegmentRunner, SegmentReport,
};
use crate::config::{RunConfig, SegmentConfig};
use crate::dedup::{Deduplicator, DuplicationKeyRule, DuplicationRule, SharedIdentifierRule};
use crate::events::{EventDispatcher, SyncEvent};
use crate::exceptions::{AbortSignal, ExceptionMonitor};
use crate::mapping::{MappingDataRepository, MappingStore};
use crate::observability::metrics;
use crate::operation::OperationExecutive;
use crate::processor::Processor;
use crate::registry::{EntityTypeRegistry, RegisteredEntityType};

/// One executed segment and its accounting.
#[derive(Debug, Clone)]
pub struct SegmentResult {
    pub description: String,
    pub report: SegmentReport,
}

/// Aggregated result of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub segments: Vec<SegmentResult>,
    pub run_aborted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    fn new() -> Self {
        RunReport {
            segments: Vec::new(),
            run_aborted: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Total count of one outcome across all segments.
    pub fn outcome_total(&self, outcome: &str) -> usize {
        self.segments.iter().map(|s| s.report.count(outcome)).sum()
    }

    pub fn total_processed(&self) -> usize {
        self.segments.iter().map(|s| s.report.processed).sum()
    }
}

/// A configured synchronization run over one registry and repository.
pub struct SyncRun {
    config: RunConfig,
    registry: Arc<EntityTypeRegistry>,
    mapping_data: Arc<MappingDataRepository>,
    executive: Arc<OperationExecutive>,
    events: Arc<EventDispatcher>,
}

impl SyncRun {
    pub fn new(
        config: RunConfig,
        registry: Arc<EntityTypeRegistry>,
        repository: Arc<dyn Repository>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        // Every entity cache tracks destination writes as they happen.
        for entry in registry.entries() {
            events.register(entry.cache.clone());
        }
        SyncRun {
            config,
            registry,
            mapping_data: Arc::new(MappingDataRepository::new(repository.clone())),
            executive: Arc::new(OperationExecutive::new(repository)),
            events,
        }
    }

    pub async fn execute(&self) -> Result<RunReport> {
        self.config.validate()?;
        let monitor = Arc::new(ExceptionMonitor::new(self.config.run_abort_threshold));
        let mut report = RunReport::new();

        for (index, segment) in self.config.segments.iter().enumerate() {
            let description = segment.describe();
            self.events.dispatch(SyncEvent::SegmentExecuting {
                index,
                description: description.clone(),
            });

            // Mapping cache is reused across consecutive segments
            // targeting the same destination system.
            let destination = self.config.destination_for(segment);
            if self.mapping_data.needs_reload(&destination) {
                self.events.dispatch(SyncEvent::MappingsCaching {
                    destination_system: destination.clone(),
                });
                let count = self.mapping_data.reload(&destination).await?;
                self.events.dispatch(SyncEvent::MappingsCached {
                    destination_system: destination.clone(),
                    count,
                });
            }

            let mut handler = monitor.clone().segment(self.config.segment_threshold_for(segment));
            let segment_report = match segment {
                SegmentConfig::Migration {
                    entity_type,
                    source_system,
                    orphan_mappings,
                    ..
                } => {
                    let runner = self.build_migration_runner(
                        EntityTypeId::new(entity_type.clone()),
                        SourceSystemId::new(source_system.clone()),
                        *orphan_mappings,
                        segment,
                    ).await?;
                    runner.run(&mut handler).await?
                }
                SegmentConfig::GarbageCollection {
                    entity_type,
                    behavior,
                    ..
                } => {
                    let entry = self.registered(&EntityTypeId::new(entity_type.clone()))?;
                    let runner = GarbageCollectionSegmentRunner::new(
                        entry.config.entity_type.clone(),
                        entry.config.sink.clone(),
                        self.mapping_data.clone(),
                        self.executive.clone(),
                        self.events.clone(),
                        *behavior,
                    );
                    runner.run(&mut handler).await?
                }
            };

            let aborted = segment_report.aborted;
            report.segments.push(SegmentResult {
                description: description.clone(),
                report: segment_report,
            });
            match aborted {
                Some(AbortSignal::Run) => {
                    self.events.dispatch(SyncEvent::SegmentAborted {
                        index,
                        description,
                    });
                    self.events.dispatch(SyncEvent::RunAborted);
                    metrics::runner::run_aborted();
                    report.run_aborted = true;
                    break;
                }
                Some(AbortSignal::Segment) => {
                    self.events.dispatch(SyncEvent::SegmentAborted {
                        index,
                        description,
                    });
                    metrics::runner::segment_aborted();
                }
                None => {
                    self.events.dispatch(SyncEvent::SegmentExecuted {
                        index,
                        description,
                    });
                }
            }
        }

        report.completed_at = Some(Utc::now());
        info!(
            "Run finished: {} segments, {} items, aborted={}",
            report.segments.len(),
            report.total_processed(),
            report.run_aborted
        );
        Ok(report)
    }

    fn registered(&self, entity_type: &EntityTypeId) -> Result<&RegisteredEntityType> {
        self.registry.get(entity_type).ok_or_else(|| {
            SyncError::Config(format!("entity type {} is not registered", entity_type))
        })
    }

    async fn build_migration_runner(
        &self,
        entity_type: EntityTypeId,
        source_system: SourceSystemId,
        orphan_behavior: crate::config::OrphanMappingBehavior,
        segment: &SegmentConfig,
    ) -> Result<MigrationSegmentRunner> {
        let entry = self.registered(&entity_type)?;
        let feed = entry.feed_for(&source_system).ok_or_else(|| {
            SyncError::Config(format!(
                "no feed registered for {} from {}",
                entity_type, source_system
            ))
        })?;

        // The cache is (re)populated once per segment.
        if entry.config.cache_feed.is_some() {
            self.events.dispatch(SyncEvent::CachePopulating {
                entity_type: entity_type.clone(),
            });
            let count = entry.cache.populate(entry.config.cache_feed.as_ref()).await?;
            self.events.dispatch(SyncEvent::CachePopulated {
                entity_type: entity_type.clone(),
                count,
            });
        }

        let destination = self.config.destination_for(segment);
        let mappings = Arc::new(MappingStore::new(
            self.mapping_data.clone(),
            entry.config.serializer.clone(),
            destination,
            entity_type.clone(),
            source_system.clone(),
        ));

        let mut rules: Vec<Arc<dyn DuplicationRule>> = Vec::new();
        if entry.config.duplicable {
            if !entry.config.duplication_keys.is_empty() {
                rules.push(Arc::new(DuplicationKeyRule::new(
                    &entry.cache,
                    &entry.config.duplication_keys,
                    self.registry.known_entity_types(),
                    entry.config.metadata.clone(),
                )));
            }
            if !entry.config.shared_identifier_sources.is_empty() {
                rules.push(Arc::new(SharedIdentifierRule::new(
                    entity_type.clone(),
                    entry.config.shared_identifier_sources.clone(),
                    self.mapping_data.clone(),
                    entry.config.metadata.clone(),
                )));
            }
        }

        let processor = Processor::new(
            entity_type.clone(),
            entry.config.immutable,
            entry.config.duplicable,
            entry.config.metadata.clone(),
            entry.config.preprocessor.clone(),
            entry.config.merger.clone(),
            entry.config.sink.clone(),
            mappings.clone(),
            Arc::new(Deduplicator::new(rules)),
            self.events.clone(),
        );

        Ok(MigrationSegmentRunner::new(
            entity_type,
            source_system,
            feed,
            entry.config.metadata.clone(),
            processor,
            mappings,
            self.executive.clone(),
            self.events.clone(),
            orphan_behavior,
        ))
    }
}
