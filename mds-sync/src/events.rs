//! Lifecycle notifications. The engine dispatches strictly paired
//! before/after events per operation lifecycle; listeners (a tracing
//! logger, the entity cache, external subscribers) register at setup.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use mds_core::domain::{
    DestinationSystemId, EntityDeletionOutcome, EntityIdentifier, EntityRecord, EntityTypeId,
    EntityTransactionOutcome, MappingState, SourceSystemId,
};

#[derive(Debug, Clone)]
pub enum SyncEvent {
    CachePopulating {
        entity_type: EntityTypeId,
    },
    CachePopulated {
        entity_type: EntityTypeId,
        count: usize,
    },
    LoadingEntities {
        entity_type: EntityTypeId,
        source_system: SourceSystemId,
    },
    EntitiesLoaded {
        entity_type: EntityTypeId,
        source_system: SourceSystemId,
        count: usize,
    },
    MappingsCaching {
        destination_system: DestinationSystemId,
    },
    MappingsCached {
        destination_system: DestinationSystemId,
        count: usize,
    },
    EntityProcessing {
        entity_type: EntityTypeId,
        label: String,
    },
    EntityProcessed {
        entity_type: EntityTypeId,
        outcome: EntityTransactionOutcome,
    },
    DeletionProcessing {
        entity_type: EntityTypeId,
        destination_id: EntityIdentifier,
    },
    DeletionProcessed {
        entity_type: EntityTypeId,
        outcome: EntityDeletionOutcome,
    },
    OrphanMappingProcessing {
        entity_type: EntityTypeId,
        mapping_id: Uuid,
    },
    OrphanMappingProcessed {
        entity_type: EntityTypeId,
        mapping_id: Uuid,
        state: MappingState,
    },
    SegmentExecuting {
        index: usize,
        description: String,
    },
    SegmentExecuted {
        index: usize,
        description: String,
    },
    SegmentAborted {
        index: usize,
        description: String,
    },
    RunAborted,
}

/// External observer of the run. `on_entity_written` fires on every
/// successful destination create or update so subscribers (the cache)
/// can track destination state without a full reload.
pub trait SyncListener: Send + Sync {
    fn on_event(&self, event: &SyncEvent);

    fn on_entity_written(&self, _entity: &EntityRecord) {}
}

/// Fan-out dispatcher over registered listeners. Dispatch is synchronous
/// and in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Mutex<Vec<Arc<dyn SyncListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn SyncListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn dispatch(&self, event: SyncEvent) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    pub fn entity_written(&self, entity: &EntityRecord) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_entity_written(entity);
        }
    }
}

/// Logs every lifecycle event, standing in for an external database
/// logger at the same interface.
pub struct TracingListener;

impl SyncListener for TracingListener {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::CachePopulating { entity_type } => {
                debug!("Populating {} cache", entity_type)
            }
            SyncEvent::CachePopulated { entity_type, count } => {
                info!("Populated {} cache with {} entities", entity_type, count)
            }
            SyncEvent::LoadingEntities {
                entity_type,
                source_system,
            } => debug!("Loading {} entities from {}", entity_type, source_system),
            SyncEvent::EntitiesLoaded {
                entity_type,
                source_system,
                count,
            } => info!(
                "Loaded {} {} entities from {}",
                count, entity_type, source_system
            ),
            SyncEvent::MappingsCaching { destination_system } => {
                debug!("Caching mappings for {}", destination_system)
            }
            SyncEvent::MappingsCached {
                destination_system,
                count,
            } => info!("Cached {} mappings for {}", count, destination_system),
            SyncEvent::EntityProcessing { entity_type, label } => {
                debug!("Processing {} '{}'", entity_type, label)
            }
            SyncEvent::EntityProcessed {
                entity_type,
                outcome,
            } => debug!("Processed {}: {}", entity_type, outcome.as_str()),
            SyncEvent::DeletionProcessing {
                entity_type,
                destination_id,
            } => debug!("Deleting {} {}", entity_type, destination_id),
            SyncEvent::DeletionProcessed {
                entity_type,
                outcome,
            } => debug!("Deletion of {}: {}", entity_type, outcome.as_str()),
            SyncEvent::OrphanMappingProcessing {
                entity_type,
                mapping_id,
            } => debug!("Reconciling orphan {} mapping {}", entity_type, mapping_id),
            SyncEvent::OrphanMappingProcessed {
                entity_type,
                mapping_id,
                state,
            } => info!(
                "Orphan {} mapping {} moved to {:?}",
                entity_type, mapping_id, state
            ),
            SyncEvent::SegmentExecuting { index, description } => {
                info!("Executing segment {}: {}", index, description)
            }
            SyncEvent::SegmentExecuted { index, description } => {
                info!("Segment {} completed: {}", index, description)
            }
            SyncEvent::SegmentAborted { index, description } => {
                warn!("Segment {} aborted: {}", index, description)
            }
            SyncEvent::RunAborted => warn!("Run aborted: exception threshold exceeded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        events: AtomicUsize,
        writes: AtomicUsize,
    }

    impl SyncListener for CountingListener {
        fn on_event(&self, _event: &SyncEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_entity_written(&self, _entity: &EntityRecord) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_reaches_every_listener() {
        let dispatcher = EventDispatcher::new();
        let listener = Arc::new(CountingListener {
            events: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        });
        dispatcher.register(listener.clone());
        dispatcher.register(Arc::new(TracingListener));

        dispatcher.dispatch(SyncEvent::RunAborted);
        dispatcher.entity_written(&EntityRecord::new(EntityTypeId::from("customer")));

        assert_eq!(listener.events.load(Ordering::SeqCst), 1);
        assert_eq!(listener.writes.load(Ordering::SeqCst), 1);
    }
}
