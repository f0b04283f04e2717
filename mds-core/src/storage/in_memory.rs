use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::traits::{Repository, UnitOfWork};
use crate::common::error::Result;
use crate::domain::{DestinationSystemId, Mapping, OperationRecord};

/// In-memory repository implementation for development and testing.
#[derive(Default)]
pub struct InMemoryRepository {
    mappings: Arc<Mutex<HashMap<Uuid, Mapping>>>,
    operations: Arc<Mutex<Vec<OperationRecord>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored mappings, for assertions.
    pub fn mappings(&self) -> Vec<Mapping> {
        self.mappings.lock().unwrap().values().cloned().collect()
    }

    pub fn mapping_by_id(&self, id: Uuid) -> Option<Mapping> {
        self.mappings.lock().unwrap().get(&id).cloned()
    }

    /// Committed operation records, in commit order.
    pub fn operations(&self) -> Vec<OperationRecord> {
        self.operations.lock().unwrap().clone()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }

    /// Seed a mapping directly, bypassing the unit-of-work path.
    pub fn seed_mapping(&self, mapping: Mapping) {
        self.mappings.lock().unwrap().insert(mapping.id, mapping);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load_mappings(
        &self,
        destination_system: &DestinationSystemId,
    ) -> Result<Vec<Mapping>> {
        let mappings = self.mappings.lock().unwrap();
        let loaded: Vec<Mapping> = mappings
            .values()
            .filter(|m| &m.destination_system == destination_system)
            .cloned()
            .collect();
        debug!(
            "Loaded {} mappings for destination system {}",
            loaded.len(),
            destination_system
        );
        Ok(loaded)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork {
            mappings: Arc::clone(&self.mappings),
            operations: Arc::clone(&self.operations),
            pending: Vec::new(),
        }))
    }
}

enum PendingWrite {
    Insert(Mapping),
    Update(Mapping),
}

struct InMemoryUnitOfWork {
    mappings: Arc<Mutex<HashMap<Uuid, Mapping>>>,
    operations: Arc<Mutex<Vec<OperationRecord>>>,
    pending: Vec<PendingWrite>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_mapping(&mut self, mapping: &Mapping) -> Result<()> {
        self.pending.push(PendingWrite::Insert(mapping.clone()));
        Ok(())
    }

    async fn update_mapping(&mut self, mapping: &Mapping) -> Result<()> {
        self.pending.push(PendingWrite::Update(mapping.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>, record: &OperationRecord) -> Result<()> {
        {
            let mut mappings = self.mappings.lock().unwrap();
            for write in self.pending {
                match write {
                    PendingWrite::Insert(m) => {
                        mappings.insert(m.id, m);
                    }
                    PendingWrite::Update(mut m) => {
                        m.updated_at = Utc::now();
                        mappings.insert(m.id, m);
                    }
                }
            }
        }
        self.operations.lock().unwrap().push(record.clone());
        debug!("Committed operation {}", record.id);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Rolled back {} pending writes", self.pending.len());
        Ok(())
    }
}
