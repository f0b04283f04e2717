use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One buffered log message, persisted with the operation it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        LogEntry {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// The durable record of one atomic unit of work: processing of a single
/// entity or a single deletion. Log messages accumulate while the
/// operation is open and commit together with its persisted effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub messages: Vec<LogEntry>,
    /// Deferred correlation-id update, applied at commit: the mapping
    /// named here gets its correlation id set to the given value.
    pub correlation_update: Option<(Uuid, String)>,
    /// Short outcome summary for audit queries ("new_entity_created",
    /// "deleted", ...).
    pub summary: Option<String>,
}

impl OperationRecord {
    pub fn new() -> Self {
        OperationRecord {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            messages: Vec::new(),
            correlation_update: None,
            summary: None,
        }
    }
}

impl Default for OperationRecord {
    fn default() -> Self {
        Self::new()
    }
}
