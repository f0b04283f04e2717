//! The per-entity state machine. Each `process` call runs to completion
//! inside one operation and emits exactly one transaction outcome.
//! Destination-system failures are caught at this boundary and become
//! `ExceptionThrown` outcomes; contract violations propagate and end
//! the run.

use std::sync::Arc;

use tracing::debug;

use mds_core::common::error::{Result, SyncError};
use mds_core::contracts::{Merger, MetadataProvider, Preprocessed, Preprocessor, Sink};
use mds_core::domain::{
    DeduplicationResult, EntityIdentifier, EntityRecord, EntityTypeId, EntityTransaction,
    EntityTransactionOutcome, Mapping, MappingOrigin, MappingState,
};

use crate::dedup::Deduplicator;
use crate::events::EventDispatcher;
use crate::mapping::MappingStore;
use crate::observability::metrics;
use crate::operation::Operation;

/// What the processor has resolved about the entity in flight. Passed
/// explicitly through the internal steps instead of living in an
/// untyped per-operation scratch space.
struct ProcessingContext {
    source_id: EntityIdentifier,
    label: String,
    mapping: Option<Mapping>,
}

pub struct Processor {
    entity_type: EntityTypeId,
    immutable: bool,
    duplicable: bool,
    metadata: Arc<dyn MetadataProvider>,
    preprocessor: Arc<dyn Preprocessor>,
    merger: Arc<dyn Merger>,
    sink: Arc<dyn Sink>,
    mappings: Arc<MappingStore>,
    deduplicator: Arc<Deduplicator>,
    events: Arc<EventDispatcher>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_type: EntityTypeId,
        immutable: bool,
        duplicable: bool,
        metadata: Arc<dyn MetadataProvider>,
        preprocessor: Arc<dyn Preprocessor>,
        merger: Arc<dyn Merger>,
        sink: Arc<dyn Sink>,
        mappings: Arc<MappingStore>,
        deduplicator: Arc<Deduplicator>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Processor {
            entity_type,
            immutable,
            duplicable,
            metadata,
            preprocessor,
            merger,
            sink,
            mappings,
            deduplicator,
            events,
        }
    }

    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    /// Process one source entity to completion inside `operation`.
    pub async fn process(
        &self,
        operation: &mut Operation,
        entity: EntityRecord,
    ) -> Result<EntityTransaction> {
        let source_id = self.metadata.source_identifier(&entity).ok_or_else(|| {
            SyncError::contract(format!(
                "{} entity has no source identifier",
                self.entity_type
            ))
        })?;
        let context = ProcessingContext {
            label: self.metadata.label(&entity),
            mapping: self.mappings.get_mapping(&source_id),
            source_id,
        };

        let transaction = match self.classify(operation, &context, entity).await {
            Ok(transaction) => transaction,
            Err(e) if e.is_destination_failure() => {
                operation.log(format!(
                    "Destination system failure while processing '{}': {}",
                    context.label, e
                ));
                EntityTransaction::new(EntityTransactionOutcome::ExceptionThrown)
                    .with_error(e.to_string())
            }
            Err(e) => return Err(e),
        };

        let transaction = transaction
            .with_source_id(context.source_id.clone())
            .with_label(context.label.clone());
        metrics::processor::transaction(transaction.outcome);
        debug!(
            "Processed {} '{}': {}",
            self.entity_type,
            context.label,
            transaction.outcome.as_str()
        );
        Ok(transaction)
    }

    async fn classify(
        &self,
        operation: &mut Operation,
        context: &ProcessingContext,
        entity: EntityRecord,
    ) -> Result<EntityTransaction> {
        // Immutable types are only ever created, never revisited.
        if self.immutable && context.mapping.is_some() {
            operation.log(format!(
                "{} '{}' is immutable and already mapped; skipping",
                self.entity_type, context.label
            ));
            return Ok(EntityTransaction::new(EntityTransactionOutcome::Skipped));
        }

        let entity = match self.preprocessor.apply(entity)? {
            Preprocessed::Accepted(entity) => entity,
            Preprocessed::Rejected { reason } => {
                operation.log(format!(
                    "Preprocessor rejected '{}': {}",
                    context.label, reason
                ));
                return Ok(EntityTransaction::new(EntityTransactionOutcome::Rejected));
            }
        };

        match context.mapping.clone() {
            Some(mapping) => self.process_mapped(operation, context, mapping, &entity).await,
            None => self.process_unmapped(operation, context, &entity).await,
        }
    }

    async fn process_mapped(
        &self,
        operation: &mut Operation,
        context: &ProcessingContext,
        mapping: Mapping,
        entity: &EntityRecord,
    ) -> Result<EntityTransaction> {
        let hash = self.mappings.content_hash(entity)?;
        if hash == mapping.entity_hash && mapping.is_active() {
            // Fast path: unchanged content, no destination access.
            operation.log(format!("No content changes for '{}'", context.label));
            return Ok(EntityTransaction::new(
                EntityTransactionOutcome::NoChangesDetected,
            ));
        }

        let Some(destination) = self.sink.get(&mapping.destination_entity_id).await? else {
            operation.log(format!(
                "Mapped destination entity {} not found for '{}'",
                mapping.destination_entity_id, context.label
            ));
            return Ok(EntityTransaction::new(
                EntityTransactionOutcome::NotFoundInDestinationSystem,
            ));
        };

        let mut trunk = match self.preprocessor.apply(destination)? {
            Preprocessed::Accepted(entity) => entity,
            Preprocessed::Rejected { reason } => {
                operation.log(format!(
                    "Preprocessor rejected destination entity for '{}': {}",
                    context.label, reason
                ));
                return Ok(EntityTransaction::new(EntityTransactionOutcome::Rejected));
            }
        };

        let previous = self.mappings.load_entity(&mapping)?;
        let changes = self.merger.merge(&mut trunk, Some(&previous), entity)?;
        self.sink.update(&trunk).await?;

        if self.metadata.destination_identifier(&trunk).as_ref()
            != Some(&mapping.destination_entity_id)
        {
            return Err(SyncError::contract(format!(
                "destination identifier of '{}' changed during merge",
                context.label
            )));
        }

        let mapping = if mapping.is_active() {
            mapping
        } else {
            operation.log(format!("Reactivating mapping for '{}'", context.label));
            self.mappings
                .set_state(operation, &mapping, MappingState::Active)
                .await?
        };
        // The persisted snapshot always advances to the new source content.
        self.mappings
            .update_entity(operation, &mapping, entity)
            .await?;
        self.events.entity_written(&trunk);

        if changes.is_empty() {
            Ok(EntityTransaction::new(
                EntityTransactionOutcome::NoChangesMerged,
            ))
        } else {
            operation.log(format!(
                "Merged {} field changes into '{}'",
                changes.len(),
                context.label
            ));
            Ok(
                EntityTransaction::new(EntityTransactionOutcome::ChangesDetectedAndMerged)
                    .with_changes(changes),
            )
        }
    }

    async fn process_unmapped(
        &self,
        operation: &mut Operation,
        context: &ProcessingContext,
        entity: &EntityRecord,
    ) -> Result<EntityTransaction> {
        let result = if self.duplicable {
            self.deduplicator.deduplicate(entity).await?
        } else {
            // Non-duplicable types are always treated as new.
            DeduplicationResult::NewEntity
        };

        match result {
            DeduplicationResult::NewEntity => self.create_new(operation, context, entity).await,
            DeduplicationResult::DuplicateFound(destination_id) => {
                self.merge_into_duplicate(operation, context, destination_id, entity)
                    .await
            }
            DeduplicationResult::ManualInspectionRequired(candidates) => {
                // Placeholder path: the candidates are recorded, nothing
                // else happens until a review queue exists.
                let listed: Vec<String> = candidates
                    .iter()
                    .map(|c| format!("{} ({:?})", c.destination_id, c.weight))
                    .collect();
                operation.log(format!(
                    "Manual inspection required for '{}': candidates [{}]",
                    context.label,
                    listed.join(", ")
                ));
                Ok(EntityTransaction::new(
                    EntityTransactionOutcome::ReferredForManualDeduplication,
                ))
            }
        }
    }

    async fn merge_into_duplicate(
        &self,
        operation: &mut Operation,
        context: &ProcessingContext,
        destination_id: EntityIdentifier,
        entity: &EntityRecord,
    ) -> Result<EntityTransaction> {
        // A duplicate target that vanished between deduplication and the
        // fetch is an invariant violation, not a runtime condition.
        let destination = self.sink.get(&destination_id).await?.ok_or_else(|| {
            SyncError::contract(format!(
                "duplicate destination entity {} no longer exists",
                destination_id
            ))
        })?;

        let mut trunk = match self.preprocessor.apply(destination)? {
            Preprocessed::Accepted(entity) => entity,
            Preprocessed::Rejected { reason } => {
                operation.log(format!(
                    "Preprocessor rejected duplicate destination entity for '{}': {}",
                    context.label, reason
                ));
                return Ok(EntityTransaction::new(EntityTransactionOutcome::Rejected));
            }
        };

        // No prior mapping, so the merge has no "previous" snapshot.
        let changes = self.merger.merge(&mut trunk, None, entity)?;
        self.sink.update(&trunk).await?;
        self.mappings
            .create_mapping(
                operation,
                &context.source_id,
                destination_id,
                MappingOrigin::Deduplication,
                entity,
            )
            .await?;
        self.events.entity_written(&trunk);
        operation.log(format!(
            "Mapped '{}' to existing destination entity via deduplication",
            context.label
        ));

        if changes.is_empty() {
            Ok(EntityTransaction::new(
                EntityTransactionOutcome::DuplicateDetectedNoChangesMerged,
            ))
        } else {
            Ok(EntityTransaction::new(
                EntityTransactionOutcome::DuplicateDetectedChangesMerged,
            )
            .with_changes(changes))
        }
    }

    async fn create_new(
        &self,
        operation: &mut Operation,
        context: &ProcessingContext,
        entity: &EntityRecord,
    ) -> Result<EntityTransaction> {
        let mut trunk = self.sink.new_entity().await?;
        let changes = self.merger.merge(&mut trunk, None, entity)?;
        let created = self.sink.create(trunk).await?;

        let destination_id = self.metadata.destination_identifier(&created).ok_or_else(|| {
            SyncError::contract(format!(
                "sink returned created {} entity without destination identifier",
                self.entity_type
            ))
        })?;

        self.mappings
            .create_mapping(
                operation,
                &context.source_id,
                destination_id,
                MappingOrigin::NewEntity,
                entity,
            )
            .await?;
        self.events.entity_written(&created);
        operation.log(format!(
            "Created new destination entity for '{}'",
            context.label
        ));

        Ok(
            EntityTransaction::new(EntityTransactionOutcome::NewEntityCreated)
                .with_changes(changes),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mds_core::domain::{DestinationSystemId, Duplicate, SourceSystemId};
    use mds_core::storage::InMemoryRepository;

    use crate::collaborators::{
        FieldMetadataProvider, IdentityPreprocessor, InMemorySink, JsonEntitySerializer,
        LastWriteMerger,
    };
    use crate::dedup::DuplicationRule;
    use crate::mapping::MappingDataRepository;
    use crate::operation::OperationExecutive;

    struct Harness {
        repository: Arc<InMemoryRepository>,
        sink: Arc<InMemorySink>,
        mappings: Arc<MappingStore>,
        executive: OperationExecutive,
        processor: Processor,
    }

    struct FixedRule {
        duplicates: Vec<Duplicate>,
    }

    #[async_trait]
    impl DuplicationRule for FixedRule {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn find_duplicates(&self, _entity: &EntityRecord) -> Result<Vec<Duplicate>> {
            Ok(self.duplicates.clone())
        }
    }

    fn harness_with(duplicable: bool, immutable: bool, duplicates: Vec<Duplicate>) -> Harness {
        let repository = Arc::new(InMemoryRepository::new());
        let sink = Arc::new(InMemorySink::new(EntityTypeId::from("customer"), "id"));
        let metadata = Arc::new(FieldMetadataProvider::standard());
        let mappings = Arc::new(MappingStore::new(
            Arc::new(MappingDataRepository::new(repository.clone())),
            Arc::new(JsonEntitySerializer),
            DestinationSystemId::from("crm"),
            EntityTypeId::from("customer"),
            SourceSystemId::from("erp"),
        ));
        let deduplicator = Arc::new(Deduplicator::new(vec![
            Arc::new(FixedRule { duplicates }) as Arc<dyn DuplicationRule>
        ]));
        let processor = Processor::new(
            EntityTypeId::from("customer"),
            immutable,
            duplicable,
            metadata.clone(),
            Arc::new(IdentityPreprocessor),
            Arc::new(LastWriteMerger::protecting(["id"])),
            sink.clone(),
            mappings.clone(),
            deduplicator,
            Arc::new(EventDispatcher::new()),
        );
        Harness {
            executive: OperationExecutive::new(repository.clone()),
            repository,
            sink,
            mappings,
            processor,
        }
    }

    fn harness() -> Harness {
        harness_with(false, false, Vec::new())
    }

    fn source_entity(name: &str) -> EntityRecord {
        EntityRecord::new(EntityTypeId::from("customer"))
            .with("source_id", "c-1")
            .with("name", name)
            .with("email", "ada@example.com")
    }

    async fn run_one(harness: &Harness, entity: EntityRecord) -> EntityTransaction {
        let mut operation = harness.executive.begin().await.unwrap();
        let transaction = harness.processor.process(&mut operation, entity).await.unwrap();
        operation.set_summary(transaction.outcome.as_str());
        harness.executive.commit(operation).await.unwrap();
        transaction
    }

    #[tokio::test]
    async fn unmapped_entity_is_created_and_mapped() {
        let harness = harness();
        let transaction = run_one(&harness, source_entity("Ada")).await;

        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::NewEntityCreated
        );
        assert_eq!(harness.sink.entity_count(), 1);
        let mappings = harness.repository.mappings();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].origin, MappingOrigin::NewEntity);
        assert_eq!(mappings[0].state, MappingState::Active);
    }

    #[tokio::test]
    async fn unchanged_entity_takes_the_fast_path_twice() {
        let harness = harness();
        run_one(&harness, source_entity("Ada")).await;
        let updates_after_create = harness.sink.update_count();

        for _ in 0..2 {
            let transaction = run_one(&harness, source_entity("Ada")).await;
            assert_eq!(
                transaction.outcome,
                EntityTransactionOutcome::NoChangesDetected
            );
        }
        // No destination writes happened on the fast path
        assert_eq!(harness.sink.update_count(), updates_after_create);
    }

    #[tokio::test]
    async fn changed_content_is_merged_and_snapshot_advanced() {
        let harness = harness();
        run_one(&harness, source_entity("Ada")).await;

        let transaction = run_one(&harness, source_entity("Ada Lovelace")).await;
        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::ChangesDetectedAndMerged
        );
        assert_eq!(transaction.changes.len(), 1);
        assert_eq!(transaction.changes[0].field_name, "name");

        // Reprocessing the same content again is now a no-op
        let transaction = run_one(&harness, source_entity("Ada Lovelace")).await;
        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::NoChangesDetected
        );
    }

    #[tokio::test]
    async fn missing_destination_entity_is_reported() {
        let harness = harness();
        run_one(&harness, source_entity("Ada")).await;
        harness.sink.clear();

        let transaction = run_one(&harness, source_entity("Ada Lovelace")).await;
        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::NotFoundInDestinationSystem
        );
    }

    #[tokio::test]
    async fn immutable_mapped_entities_are_skipped() {
        let harness = harness_with(false, true, Vec::new());
        run_one(&harness, source_entity("Ada")).await;

        let transaction = run_one(&harness, source_entity("Changed")).await;
        assert_eq!(transaction.outcome, EntityTransactionOutcome::Skipped);
    }

    #[tokio::test]
    async fn duplicate_found_merges_and_maps_with_dedup_origin() {
        let existing = EntityRecord::new(EntityTypeId::from("customer"))
            .with("id", "d-7")
            .with("name", "A. Lovelace")
            .with("email", "ada@example.com");

        let harness = harness_with(true, false, vec![Duplicate::positive("d-7")]);
        harness.sink.insert(existing);

        let transaction = run_one(&harness, source_entity("Ada")).await;
        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::DuplicateDetectedChangesMerged
        );
        let mappings = harness.repository.mappings();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].origin, MappingOrigin::Deduplication);
        assert_eq!(
            mappings[0].destination_entity_id,
            EntityIdentifier::from("d-7")
        );
        // No second entity was created
        assert_eq!(harness.sink.entity_count(), 1);
    }

    #[tokio::test]
    async fn manual_inspection_leaves_the_destination_untouched() {
        let harness = harness_with(
            true,
            false,
            vec![Duplicate::positive("d-1"), Duplicate::inconsistent("d-2")],
        );

        let transaction = run_one(&harness, source_entity("Ada")).await;
        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::ReferredForManualDeduplication
        );
        assert_eq!(harness.sink.entity_count(), 0);
        assert!(harness.repository.mappings().is_empty());
    }

    #[tokio::test]
    async fn deactivated_mapping_is_reactivated_on_merge() {
        let harness = harness();
        run_one(&harness, source_entity("Ada")).await;

        let mapping = harness
            .mappings
            .get_mapping(&EntityIdentifier::from("c-1"))
            .unwrap();
        let mut operation = harness.executive.begin().await.unwrap();
        harness
            .mappings
            .set_state(&mut operation, &mapping, MappingState::Deactivated)
            .await
            .unwrap();
        harness.executive.commit(operation).await.unwrap();

        // Same content: the hash matches but the mapping is not Active,
        // so the full merge path runs and reactivates it.
        let transaction = run_one(&harness, source_entity("Ada")).await;
        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::NoChangesMerged
        );
        let reactivated = harness
            .mappings
            .get_mapping(&EntityIdentifier::from("c-1"))
            .unwrap();
        assert_eq!(reactivated.state, MappingState::Active);
    }

    #[tokio::test]
    async fn destination_failures_become_exception_outcomes() {
        struct FailingSink;

        #[async_trait]
        impl mds_core::contracts::Sink for FailingSink {
            async fn new_entity(&self) -> Result<EntityRecord> {
                Err(SyncError::destination("sink offline"))
            }

            async fn create(&self, _entity: EntityRecord) -> Result<EntityRecord> {
                Err(SyncError::destination("sink offline"))
            }

            async fn get(&self, _id: &EntityIdentifier) -> Result<Option<EntityRecord>> {
                Err(SyncError::destination("sink offline"))
            }

            async fn update(&self, _entity: &EntityRecord) -> Result<()> {
                Err(SyncError::destination("sink offline"))
            }

            async fn delete(&self, _entity: &EntityRecord) -> Result<()> {
                Err(SyncError::destination("sink offline"))
            }

            async fn entity_identifiers(&self) -> Result<Vec<EntityIdentifier>> {
                Err(SyncError::destination("sink offline"))
            }
        }

        let repository = Arc::new(InMemoryRepository::new());
        let mappings = Arc::new(MappingStore::new(
            Arc::new(MappingDataRepository::new(repository.clone())),
            Arc::new(JsonEntitySerializer),
            DestinationSystemId::from("crm"),
            EntityTypeId::from("customer"),
            SourceSystemId::from("erp"),
        ));
        let processor = Processor::new(
            EntityTypeId::from("customer"),
            false,
            false,
            Arc::new(FieldMetadataProvider::standard()),
            Arc::new(IdentityPreprocessor),
            Arc::new(LastWriteMerger::protecting(["id"])),
            Arc::new(FailingSink),
            mappings,
            Arc::new(Deduplicator::new(Vec::new())),
            Arc::new(EventDispatcher::new()),
        );
        let executive = OperationExecutive::new(repository.clone());

        let mut operation = executive.begin().await.unwrap();
        let transaction = processor
            .process(&mut operation, source_entity("Ada"))
            .await
            .unwrap();
        executive.commit(operation).await.unwrap();

        assert_eq!(
            transaction.outcome,
            EntityTransactionOutcome::ExceptionThrown
        );
        // Resolved fields survive for logging
        assert_eq!(
            transaction.source_entity_id,
            Some(EntityIdentifier::from("c-1"))
        );
        assert!(transaction.error.is_some());
    }

    #[tokio::test]
    async fn missing_source_identifier_is_fatal() {
        let harness = harness();
        let mut operation = harness.executive.begin().await.unwrap();
        let entity = EntityRecord::new(EntityTypeId::from("customer")).with("name", "Nameless");
        let result = harness.processor.process(&mut operation, entity).await;
        assert!(matches!(result, Err(SyncError::Contract(_))));
        harness.executive.abort(operation).await.unwrap();
    }
}
