//! Declarative run configuration, loaded from TOML. A run is a sequence
//! of segments, each a migration or garbage-collection pass over one
//! entity type.

use std::path::Path;

use serde::Deserialize;

use mds_core::common::error::{Result, SyncError};
use mds_core::domain::{DestinationSystemId, EntityTypeId};

/// What happens to mappings whose source entity was not seen in the
/// current migration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanMappingBehavior {
    /// No orphan tracking.
    #[default]
    None,
    /// Orphaned active mappings are deactivated.
    Deactivate,
    /// Orphaned non-removed mappings are marked removed.
    Remove,
}

/// Which destination entities a garbage-collection segment deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GarbageCollectionBehavior {
    /// Delete nothing.
    #[default]
    None,
    /// Existing entities whose mapping is inactive and originated as a
    /// fresh creation.
    DeleteCreated,
    /// Existing entities with any inactive mapping.
    DeleteMapped,
    /// Every existing entity without an active mapping.
    DeleteAll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentConfig {
    Migration {
        entity_type: String,
        source_system: String,
        /// Overrides the run-level destination system.
        destination_system: Option<String>,
        #[serde(default)]
        orphan_mappings: OrphanMappingBehavior,
        /// Overrides the run-level segment abort threshold.
        abort_threshold: Option<u32>,
    },
    GarbageCollection {
        entity_type: String,
        destination_system: Option<String>,
        #[serde(default)]
        behavior: GarbageCollectionBehavior,
        abort_threshold: Option<u32>,
    },
}

impl SegmentConfig {
    pub fn entity_type(&self) -> EntityTypeId {
        match self {
            SegmentConfig::Migration { entity_type, .. }
            | SegmentConfig::GarbageCollection { entity_type, .. } => {
                EntityTypeId::new(entity_type.clone())
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SegmentConfig::Migration {
                entity_type,
                source_system,
                ..
            } => format!("migration of {} from {}", entity_type, source_system),
            SegmentConfig::GarbageCollection { entity_type, .. } => {
                format!("garbage collection of {}", entity_type)
            }
        }
    }

    fn destination_override(&self) -> Option<&str> {
        match self {
            SegmentConfig::Migration {
                destination_system, ..
            }
            | SegmentConfig::GarbageCollection {
                destination_system, ..
            } => destination_system.as_deref(),
        }
    }

    pub fn abort_threshold(&self) -> Option<u32> {
        match self {
            SegmentConfig::Migration {
                abort_threshold, ..
            }
            | SegmentConfig::GarbageCollection {
                abort_threshold, ..
            } => *abort_threshold,
        }
    }
}

/// Per-entity-type knobs the CLI harness feeds into registration.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityTypeSettings {
    #[serde(default)]
    pub duplication_keys: Vec<String>,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default = "default_true")]
    pub duplicable: bool,
    #[serde(default)]
    pub shared_identifier_sources: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for EntityTypeSettings {
    fn default() -> Self {
        EntityTypeSettings {
            duplication_keys: Vec::new(),
            immutable: false,
            duplicable: true,
            shared_identifier_sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Default destination system for every segment.
    pub destination_system: String,
    /// Run-wide exception count at which the whole run aborts.
    pub run_abort_threshold: Option<u32>,
    /// Default per-segment exception threshold; segments may override.
    pub segment_abort_threshold: Option<u32>,
    #[serde(default)]
    pub entity_types: std::collections::HashMap<String, EntityTypeSettings>,
    #[serde(default, rename = "segment")]
    pub segments: Vec<SegmentConfig>,
}

impl RunConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RunConfig = toml::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("invalid run config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.destination_system.trim().is_empty() {
            return Err(SyncError::Config(
                "destination_system must not be empty".to_string(),
            ));
        }
        if self.segments.is_empty() {
            return Err(SyncError::Config(
                "a run needs at least one segment".to_string(),
            ));
        }
        for segment in &self.segments {
            if segment.entity_type().as_str().trim().is_empty() {
                return Err(SyncError::Config(
                    "segment entity_type must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Effective destination system for one segment.
    pub fn destination_for(&self, segment: &SegmentConfig) -> DestinationSystemId {
        DestinationSystemId::new(
            segment
                .destination_override()
                .unwrap_or(&self.destination_system),
        )
    }

    /// Effective abort threshold for one segment: its own, or the
    /// run-level default.
    pub fn segment_threshold_for(&self, segment: &SegmentConfig) -> Option<u32> {
        segment.abort_threshold().or(self.segment_abort_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
destination_system = "crm"
run_abort_threshold = 25
segment_abort_threshold = 5

[entity_types.customer]
duplication_keys = ["email"]

[[segment]]
kind = "migration"
entity_type = "customer"
source_system = "erp"
orphan_mappings = "deactivate"

[[segment]]
kind = "garbage_collection"
entity_type = "customer"
behavior = "delete_created"
abort_threshold = 2
"#;

    #[test]
    fn parses_a_full_run_config() {
        let config: RunConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.segments.len(), 2);
        assert_eq!(config.run_abort_threshold, Some(25));
        match &config.segments[0] {
            SegmentConfig::Migration {
                orphan_mappings, ..
            } => assert_eq!(*orphan_mappings, OrphanMappingBehavior::Deactivate),
            other => panic!("expected migration segment, got {:?}", other),
        }
        assert_eq!(config.segment_threshold_for(&config.segments[0]), Some(5));
        assert_eq!(config.segment_threshold_for(&config.segments[1]), Some(2));
        assert_eq!(
            config.destination_for(&config.segments[0]),
            DestinationSystemId::from("crm")
        );

        let settings = &config.entity_types["customer"];
        assert_eq!(settings.duplication_keys, vec!["email".to_string()]);
        assert!(settings.duplicable);
        assert!(!settings.immutable);
    }

    #[test]
    fn behaviors_default_to_none() {
        let raw = r#"
destination_system = "crm"

[[segment]]
kind = "garbage_collection"
entity_type = "customer"
"#;
        let config: RunConfig = toml::from_str(raw).unwrap();
        match &config.segments[0] {
            SegmentConfig::GarbageCollection { behavior, .. } => {
                assert_eq!(*behavior, GarbageCollectionBehavior::None)
            }
            other => panic!("expected gc segment, got {:?}", other),
        }
    }

    #[test]
    fn empty_destination_fails_validation() {
        let raw = r#"
destination_system = ""

[[segment]]
kind = "migration"
entity_type = "customer"
source_system = "erp"
"#;
        let config: RunConfig = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn loads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RunConfig::from_path(file.path()).unwrap();
        assert_eq!(config.destination_system, "crm");
    }
}
