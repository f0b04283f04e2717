use async_trait::async_trait;

use crate::common::error::Result;
use crate::domain::{DestinationSystemId, Mapping, OperationRecord};

/// Durable storage for mappings and operation records. Every method may
/// fail; the engine wraps failures uniformly and never retries them.
#[async_trait]
pub trait Repository: Send + Sync {
    /// All mappings for one destination system, regardless of state.
    async fn load_mappings(&self, destination_system: &DestinationSystemId)
        -> Result<Vec<Mapping>>;

    /// Open a unit of work. Writes buffered into it become durable
    /// together at commit, or not at all.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// One transaction boundary against the persistent store. All persisted
/// effects of processing one entity go through a single unit of work and
/// commit with its operation record.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_mapping(&mut self, mapping: &Mapping) -> Result<()>;

    async fn update_mapping(&mut self, mapping: &Mapping) -> Result<()>;

    async fn commit(self: Box<Self>, record: &OperationRecord) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
