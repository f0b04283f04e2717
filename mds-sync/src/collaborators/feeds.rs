use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use mds_core::common::error::Result;
use mds_core::contracts::{Feed, FeedBatch};
use mds_core::domain::{EntityRecord, EntityTypeId, FieldValue};

/// Feed over a fixed in-memory batch.
pub struct StaticFeed {
    entities: Vec<EntityRecord>,
}

impl StaticFeed {
    pub fn new(entities: Vec<EntityRecord>) -> Self {
        StaticFeed { entities }
    }
}

#[async_trait]
impl Feed for StaticFeed {
    async fn load_entities(&self) -> Result<FeedBatch> {
        Ok(FeedBatch::new(self.entities.clone()))
    }
}

/// Feed that reads a JSON array of flat objects from disk, one record
/// per object. Values deserialize through `FieldValue`, so RFC 3339
/// strings arrive as timestamps.
pub struct JsonFileFeed {
    entity_type: EntityTypeId,
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(entity_type: EntityTypeId, path: impl Into<PathBuf>) -> Self {
        JsonFileFeed {
            entity_type,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Feed for JsonFileFeed {
    async fn load_entities(&self) -> Result<FeedBatch> {
        let raw = std::fs::read_to_string(&self.path)?;
        let rows: Vec<std::collections::BTreeMap<String, FieldValue>> =
            serde_json::from_str(&raw)?;

        let entities = rows
            .into_iter()
            .map(|fields| {
                let mut record = EntityRecord::new(self.entity_type.clone());
                for (field, value) in fields {
                    record.set(field, value);
                }
                record
            })
            .collect::<Vec<_>>();
        debug!(
            "Loaded {} {} entities from {}",
            entities.len(),
            self.entity_type,
            self.path.display()
        );
        Ok(FeedBatch::new(entities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_entities_from_a_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"[
                {"source_id": "c-1", "name": "Ada", "age": 36},
                {"source_id": "c-2", "name": "Grace", "email": null}
            ]"#,
        )
        .unwrap();

        let feed = JsonFileFeed::new(EntityTypeId::from("customer"), file.path());
        let batch = feed.load_entities().await.unwrap();

        assert_eq!(batch.total, 2);
        assert_eq!(
            batch.entities[0].get("age"),
            Some(&FieldValue::Integer(36))
        );
        assert!(batch.entities[1].get_non_null("email").is_none());
    }
}
