use sha2::{Digest, Sha256};

use mds_core::common::error::Result;
use mds_core::contracts::EntitySerializer;
use mds_core::domain::EntityRecord;

/// JSON snapshot serializer. Field maps are ordered, so the byte output
/// is deterministic and the SHA-256 hash is stable for equal content.
pub struct JsonEntitySerializer;

impl EntitySerializer for JsonEntitySerializer {
    fn serialize(&self, entity: &EntityRecord) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(entity)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<EntityRecord> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn content_hash(&self, entity: &EntityRecord) -> Result<String> {
        let bytes = self.serialize(entity)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_core::domain::EntityTypeId;

    #[test]
    fn round_trip_preserves_content() {
        let serializer = JsonEntitySerializer;
        let entity = EntityRecord::new(EntityTypeId::from("customer"))
            .with("source_id", "c-1")
            .with("name", "Ada")
            .with("age", 36i64);

        let bytes = serializer.serialize(&entity).unwrap();
        let restored = serializer.deserialize(&bytes).unwrap();
        assert_eq!(restored, entity);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let serializer = JsonEntitySerializer;
        let a = EntityRecord::new(EntityTypeId::from("customer")).with("name", "Ada");
        let b = EntityRecord::new(EntityTypeId::from("customer")).with("name", "Ada");
        let c = EntityRecord::new(EntityTypeId::from("customer")).with("name", "Grace");

        assert_eq!(
            serializer.content_hash(&a).unwrap(),
            serializer.content_hash(&b).unwrap()
        );
        assert_ne!(
            serializer.content_hash(&a).unwrap(),
            serializer.content_hash(&c).unwrap()
        );
    }
}
