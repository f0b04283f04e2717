//! Operations: the atomic unit of work wrapping processing of one
//! entity or one deletion. An operation buffers log messages and
//! deferred side effects alongside the unit of work its persisted
//! writes go through; commit makes them durable together, abort drops
//! them.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use mds_core::common::error::{Result, SyncError};
use mds_core::domain::{LogEntry, OperationRecord};
use mds_core::storage::{Repository, UnitOfWork};

/// One live unit of work. Obtained from the executive, finished by
/// handing it back for commit or abort.
pub struct Operation {
    record: OperationRecord,
    uow: Box<dyn UnitOfWork>,
}

impl Operation {
    fn new(uow: Box<dyn UnitOfWork>) -> Self {
        Operation {
            record: OperationRecord::new(),
            uow,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    /// Buffer a log message; it persists with the operation at commit.
    pub fn log(&mut self, message: impl Into<String>) {
        self.record.messages.push(LogEntry::new(message));
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.record.summary = Some(summary.into());
    }

    /// Defer a correlation-id update to commit time.
    pub fn defer_correlation_update(&mut self, mapping_id: Uuid, correlation_id: String) {
        self.record.correlation_update = Some((mapping_id, correlation_id));
    }

    pub fn record(&self) -> &OperationRecord {
        &self.record
    }

    pub fn uow_mut(&mut self) -> &mut dyn UnitOfWork {
        &mut *self.uow
    }
}

/// Hands out operations and enforces that only one is current at a
/// time; beginning a second while one is active is a programming error.
pub struct OperationExecutive {
    repository: Arc<dyn Repository>,
    active: Mutex<bool>,
}

impl OperationExecutive {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        OperationExecutive {
            repository,
            active: Mutex::new(false),
        }
    }

    pub async fn begin(&self) -> Result<Operation> {
        {
            let mut active = self.active.lock().unwrap();
            if *active {
                return Err(SyncError::contract(
                    "an operation is already active; operations may not nest",
                ));
            }
            *active = true;
        }
        match self.repository.begin().await {
            Ok(uow) => Ok(Operation::new(uow)),
            Err(e) => {
                *self.active.lock().unwrap() = false;
                Err(e)
            }
        }
    }

    pub async fn commit(&self, operation: Operation) -> Result<()> {
        let Operation { mut record, uow } = operation;
        record.finished_at = Some(Utc::now());
        let result = uow.commit(&record).await;
        *self.active.lock().unwrap() = false;
        if result.is_ok() {
            debug!("Operation {} committed", record.id);
        }
        result
    }

    pub async fn abort(&self, operation: Operation) -> Result<()> {
        let Operation { record, uow } = operation;
        let result = uow.rollback().await;
        *self.active.lock().unwrap() = false;
        warn!(
            "Operation {} aborted; in-memory caches may be ahead of durable state",
            record.id
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_core::storage::InMemoryRepository;

    #[tokio::test]
    async fn second_begin_while_active_is_a_contract_error() {
        let executive = OperationExecutive::new(Arc::new(InMemoryRepository::new()));
        let first = executive.begin().await.unwrap();

        assert!(matches!(
            executive.begin().await,
            Err(SyncError::Contract(_))
        ));

        executive.commit(first).await.unwrap();
        // After commit a new operation may begin again
        let second = executive.begin().await.unwrap();
        executive.abort(second).await.unwrap();
    }

    #[tokio::test]
    async fn commit_persists_the_operation_record() {
        let repository = Arc::new(InMemoryRepository::new());
        let executive = OperationExecutive::new(repository.clone());

        let mut operation = executive.begin().await.unwrap();
        operation.log("processed entity c-1");
        operation.set_summary("new_entity_created");
        executive.commit(operation).await.unwrap();

        let committed = repository.operations();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].messages.len(), 1);
        assert_eq!(
            committed[0].summary.as_deref(),
            Some("new_entity_created")
        );
        assert!(committed[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn abort_discards_the_operation() {
        let repository = Arc::new(InMemoryRepository::new());
        let executive = OperationExecutive::new(repository.clone());

        let operation = executive.begin().await.unwrap();
        executive.abort(operation).await.unwrap();

        assert_eq!(repository.operation_count(), 0);
    }
}
