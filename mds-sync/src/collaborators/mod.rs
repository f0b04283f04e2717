//! Built-in collaborator implementations: enough to drive a run end to
//! end against in-memory state and JSON files, and the fixtures the
//! test suites are built on. Real deployments swap these for
//! destination-specific implementations of the same contracts.

pub mod feeds;
pub mod in_memory;
pub mod merger;
pub mod metadata;
pub mod preprocessor;
pub mod serializer;

pub use feeds::{JsonFileFeed, StaticFeed};
pub use in_memory::{InMemorySink, SinkCacheFeed};
pub use merger::LastWriteMerger;
pub use metadata::FieldMetadataProvider;
pub use preprocessor::IdentityPreprocessor;
pub use serializer::JsonEntitySerializer;
