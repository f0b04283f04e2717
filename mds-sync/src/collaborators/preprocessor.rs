use mds_core::common::error::Result;
use mds_core::contracts::{Preprocessed, Preprocessor};
use mds_core::domain::EntityRecord;

/// Accepts every entity unchanged.
pub struct IdentityPreprocessor;

impl Preprocessor for IdentityPreprocessor {
    fn apply(&self, entity: EntityRecord) -> Result<Preprocessed> {
        Ok(Preprocessed::Accepted(entity))
    }
}
