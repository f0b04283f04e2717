use mds_core::contracts::MetadataProvider;
use mds_core::domain::{EntityIdentifier, EntityRecord};

/// Metadata provider that reads identifiers and the display label from
/// designated fields of the record.
pub struct FieldMetadataProvider {
    source_id_field: String,
    destination_id_field: String,
    label_field: String,
}

impl FieldMetadataProvider {
    pub fn new(
        source_id_field: impl Into<String>,
        destination_id_field: impl Into<String>,
        label_field: impl Into<String>,
    ) -> Self {
        FieldMetadataProvider {
            source_id_field: source_id_field.into(),
            destination_id_field: destination_id_field.into(),
            label_field: label_field.into(),
        }
    }

    /// The conventional field names: `source_id`, `id`, `name`.
    pub fn standard() -> Self {
        FieldMetadataProvider::new("source_id", "id", "name")
    }
}

impl MetadataProvider for FieldMetadataProvider {
    fn source_identifier(&self, entity: &EntityRecord) -> Option<EntityIdentifier> {
        entity
            .get_non_null(&self.source_id_field)
            .map(|v| EntityIdentifier::new(v.to_string()))
    }

    fn destination_identifier(&self, entity: &EntityRecord) -> Option<EntityIdentifier> {
        entity
            .get_non_null(&self.destination_id_field)
            .map(|v| EntityIdentifier::new(v.to_string()))
    }

    fn label(&self, entity: &EntityRecord) -> String {
        entity
            .get_non_null(&self.label_field)
            .map(|v| v.to_string())
            .unwrap_or_else(|| entity.entity_type().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_core::domain::{EntityTypeId, FieldValue};

    #[test]
    fn reads_designated_fields() {
        let provider = FieldMetadataProvider::standard();
        let entity = EntityRecord::new(EntityTypeId::from("customer"))
            .with("source_id", "c-1")
            .with("id", "d-1")
            .with("name", "Ada");

        assert_eq!(
            provider.source_identifier(&entity),
            Some(EntityIdentifier::from("c-1"))
        );
        assert_eq!(
            provider.destination_identifier(&entity),
            Some(EntityIdentifier::from("d-1"))
        );
        assert_eq!(provider.label(&entity), "Ada");
    }

    #[test]
    fn null_identifiers_count_as_absent() {
        let provider = FieldMetadataProvider::standard();
        let entity =
            EntityRecord::new(EntityTypeId::from("customer")).with("id", FieldValue::Null);

        assert_eq!(provider.destination_identifier(&entity), None);
        assert_eq!(provider.label(&entity), "customer");
    }
}
