use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use mds_core::domain::{EntityTypeId, SourceSystemId};
use mds_core::storage::InMemoryRepository;

use mds_sync::collaborators::{
    FieldMetadataProvider, IdentityPreprocessor, InMemorySink, JsonEntitySerializer, JsonFileFeed,
    LastWriteMerger, SinkCacheFeed,
};
use mds_sync::config::{RunConfig, SegmentConfig};
use mds_sync::events::{EventDispatcher, TracingListener};
use mds_sync::homogenize::CompositeHomogenizer;
use mds_sync::observability::logging::init_logging;
use mds_sync::registry::{EntityTypeConfig, EntityTypeRegistry};
use mds_sync::runner::SyncRun;

#[derive(Parser)]
#[command(name = "mds-sync")]
#[command(about = "MDS entity synchronization engine")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a configured synchronization run against JSON entity
    /// batches and an in-memory destination
    Run {
        /// Path to the run configuration file
        #[arg(long)]
        config: PathBuf,
        /// Directory holding one `<entity_type>.<source_system>.json`
        /// batch per migration segment
        #[arg(long, default_value = "entities")]
        entities_dir: PathBuf,
    },
    /// Validate a run configuration file
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    init_logging();

    match cli.command {
        Commands::Run {
            config,
            entities_dir,
        } => {
            let config = RunConfig::from_path(&config)?;
            let registry = build_registry(&config, &entities_dir);
            let events = Arc::new(EventDispatcher::new());
            events.register(Arc::new(TracingListener));

            let repository = Arc::new(InMemoryRepository::new());
            let run = SyncRun::new(config, Arc::new(registry), repository, events);
            let report = run.execute().await?;

            for (index, segment) in report.segments.iter().enumerate() {
                println!(
                    "segment {} ({}): {} items {:?}",
                    index, segment.description, segment.report.processed,
                    segment.report.outcome_counts
                );
            }
            if report.run_aborted {
                println!("run aborted after exception threshold");
            }
        }
        Commands::CheckConfig { config } => {
            let config = RunConfig::from_path(&config)?;
            println!(
                "configuration OK: {} segments against {}",
                config.segments.len(),
                config.destination_system
            );
        }
    }

    Ok(())
}

/// Wire a registry from the run config: JSON file feeds per migration
/// segment, an in-memory sink per entity type, and the standard
/// collaborators everywhere else.
fn build_registry(config: &RunConfig, entities_dir: &Path) -> EntityTypeRegistry {
    let mut sources_by_type: HashMap<String, Vec<String>> = HashMap::new();
    for segment in &config.segments {
        if let SegmentConfig::Migration {
            entity_type,
            source_system,
            ..
        } = segment
        {
            sources_by_type
                .entry(entity_type.clone())
                .or_default()
                .push(source_system.clone());
        } else {
            sources_by_type
                .entry(segment.entity_type().as_str().to_string())
                .or_default();
        }
    }

    let mut registry = EntityTypeRegistry::new(Arc::new(CompositeHomogenizer::standard()));
    for (type_name, sources) in sources_by_type {
        let entity_type = EntityTypeId::new(type_name.clone());
        let settings = config
            .entity_types
            .get(&type_name)
            .cloned()
            .unwrap_or_default();

        let sink = Arc::new(InMemorySink::new(entity_type.clone(), "id"));
        let mut entity_config = EntityTypeConfig::new(
            entity_type.clone(),
            sink.clone(),
            Arc::new(FieldMetadataProvider::standard()),
            Arc::new(LastWriteMerger::protecting(["id"])),
            Arc::new(IdentityPreprocessor),
            Arc::new(JsonEntitySerializer),
        )
        .with_cache_feed(Arc::new(SinkCacheFeed::new(sink)))
        .with_duplication_keys(settings.duplication_keys)
        .with_shared_identifier_sources(
            settings
                .shared_identifier_sources
                .iter()
                .map(|s| SourceSystemId::new(s.clone())),
        );
        if settings.immutable {
            entity_config = entity_config.immutable();
        }
        if !settings.duplicable {
            entity_config = entity_config.not_duplicable();
        }

        for source in sources {
            let path = entities_dir.join(format!("{}.{}.json", type_name, source));
            entity_config = entity_config.with_feed(
                SourceSystemId::new(source),
                Arc::new(JsonFileFeed::new(entity_type.clone(), path)),
            );
        }

        info!("Wired entity type {} for the run", entity_type);
        registry.register(entity_config);
    }
    registry
}
