use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A sink, duplication rule, cache feed or gateway call failed.
    /// Caught per entity and converted into an `ExceptionThrown` outcome.
    #[error("destination system failure: {0}")]
    DestinationSystem(String),

    /// A collaborator broke its contract (missing identifier, identifier
    /// drift, second active operation). Fatal, never retried.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("repository failure: {0}")]
    Repository(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn destination(message: impl Into<String>) -> Self {
        SyncError::DestinationSystem(message.into())
    }

    pub fn contract(message: impl Into<String>) -> Self {
        SyncError::Contract(message.into())
    }

    /// Whether this error is a per-entity destination failure rather than
    /// a fatal contract or infrastructure problem.
    pub fn is_destination_failure(&self) -> bool {
        matches!(self, SyncError::DestinationSystem(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
