use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roster_dedupe::config::EngineConfig;
use roster_dedupe::dedupe::models::{collections, from_document, EntityType, Person, Room, Schedule};
use roster_dedupe::dedupe::{
    backfill_identity_keys, detect_cross_collection_issues, detect_people_duplicates,
    detect_room_duplicates, detect_schedule_duplicates, mark_not_duplicate, revoke_decision,
    DuplicatePair, FieldChoices, MergeEngine, NotDuplicateRequest, SuppressionSet,
};
use roster_dedupe::store::{DocumentStore, MemoryStore};

#[derive(Parser)]
#[command(name = "roster-dedupe")]
#[command(about = "Identity resolution and deduplication for the roster dashboard")]
#[command(version)]
struct Cli {
    /// Path to a JSON snapshot: an object mapping collection names to
    /// arrays of documents
    #[arg(long, global = true, default_value = "snapshot.json")]
    snapshot: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect duplicate people
    ScanPeople,
    /// Detect duplicate schedule rows
    ScanSchedules,
    /// Detect duplicate rooms
    ScanRooms,
    /// Report cross-collection referential integrity issues
    Integrity,
    /// Repair missing or outdated schedule identity keys in place
    Backfill {
        /// Documents fetched per page
        #[arg(long, default_value_t = 200)]
        page_size: usize,
    },
    /// Merge a duplicate person into a canonical one
    MergePeople {
        primary_id: String,
        duplicate_id: String,
    },
    /// Merge a duplicate room into a canonical one
    MergeRooms {
        primary_id: String,
        duplicate_id: String,
    },
    /// Merge a duplicate schedule row into a canonical one
    MergeSchedules {
        primary_id: String,
        duplicate_id: String,
    },
    /// Record that a flagged pair is not a duplicate
    NotDuplicate {
        entity_type: EntityType,
        id_a: String,
        id_b: String,
        /// Optional reason recorded with the decision
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Revoke a previous not-a-duplicate decision
    RevokeDecision {
        entity_type: EntityType,
        id_a: String,
        id_b: String,
    },
}

async fn load_snapshot(path: &Path) -> Result<MemoryStore> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let snapshot: BTreeMap<String, Vec<Value>> =
        serde_json::from_str(&raw).context("snapshot must map collection names to arrays")?;

    let store = MemoryStore::new();
    for (collection, docs) in snapshot {
        store.load(&collection, docs).await?;
    }
    Ok(store)
}

async fn write_snapshot(store: &MemoryStore, path: &Path) -> Result<()> {
    let snapshot = store.dump().await;
    let raw = serde_json::to_string_pretty(&snapshot)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    Ok(())
}

async fn collect<T: serde::de::DeserializeOwned>(
    store: &MemoryStore,
    collection: &str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list_page(collection, 500, cursor.as_deref()).await?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|doc| doc.id.clone());
        for doc in &page {
            out.push(from_document(doc)?);
        }
    }
    Ok(out)
}

fn print_pairs(pairs: &[DuplicatePair]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(pairs)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "roster_dedupe=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let store = load_snapshot(&cli.snapshot).await?;

    match cli.command {
        Commands::ScanPeople => {
            let suppressions = SuppressionSet::load(&store).await?;
            let people: Vec<Person> = collect(&store, collections::PEOPLE).await?;
            let pairs = detect_people_duplicates(&people, &suppressions, &config.detection);
            info!(candidates = pairs.len(), "people scan complete");
            print_pairs(&pairs)?;
        }
        Commands::ScanSchedules => {
            let suppressions = SuppressionSet::load(&store).await?;
            let schedules: Vec<Schedule> = collect(&store, collections::SCHEDULES).await?;
            let pairs = detect_schedule_duplicates(&schedules, &suppressions);
            info!(candidates = pairs.len(), "schedule scan complete");
            print_pairs(&pairs)?;
        }
        Commands::ScanRooms => {
            let suppressions = SuppressionSet::load(&store).await?;
            let rooms: Vec<Room> = collect(&store, collections::ROOMS).await?;
            let pairs = detect_room_duplicates(&rooms, &suppressions);
            info!(candidates = pairs.len(), "room scan complete");
            print_pairs(&pairs)?;
        }
        Commands::Integrity => {
            let people: Vec<Person> = collect(&store, collections::PEOPLE).await?;
            let schedules: Vec<Schedule> = collect(&store, collections::SCHEDULES).await?;
            let rooms: Vec<Room> = collect(&store, collections::ROOMS).await?;
            let issues = detect_cross_collection_issues(&people, &schedules, &rooms);
            info!(issues = issues.len(), "integrity scan complete");
            println!("{}", serde_json::to_string_pretty(&issues)?);
        }
        Commands::Backfill { page_size } => {
            let report = backfill_identity_keys(&store, page_size).await?;
            write_snapshot(&store, &cli.snapshot).await?;
            println!(
                "scanned {} schedules, repaired {}",
                report.scanned, report.repaired
            );
        }
        Commands::MergePeople {
            primary_id,
            duplicate_id,
        } => {
            let store = Arc::new(store);
            let engine = MergeEngine::new(store.clone(), config.merge);
            let merged = engine
                .merge_people(&primary_id, &duplicate_id, &FieldChoices::new())
                .await?;
            write_snapshot(&store, &cli.snapshot).await?;
            println!("merged {duplicate_id} into {}", merged.id);
        }
        Commands::MergeRooms {
            primary_id,
            duplicate_id,
        } => {
            let store = Arc::new(store);
            let engine = MergeEngine::new(store.clone(), config.merge);
            let merged = engine.merge_rooms(&primary_id, &duplicate_id).await?;
            write_snapshot(&store, &cli.snapshot).await?;
            println!("merged {duplicate_id} into {}", merged.id);
        }
        Commands::MergeSchedules {
            primary_id,
            duplicate_id,
        } => {
            let store = Arc::new(store);
            let engine = MergeEngine::new(store.clone(), config.merge);
            let merged = engine.merge_schedules(&primary_id, &duplicate_id).await?;
            write_snapshot(&store, &cli.snapshot).await?;
            println!("merged {duplicate_id} into {}", merged.id);
        }
        Commands::NotDuplicate {
            entity_type,
            id_a,
            id_b,
            reason,
        } => {
            let decision = mark_not_duplicate(
                &store,
                NotDuplicateRequest {
                    entity_type,
                    id_a,
                    id_b,
                    reason,
                },
            )
            .await?;
            write_snapshot(&store, &cli.snapshot).await?;
            println!("recorded decision {}", decision.id);
        }
        Commands::RevokeDecision {
            entity_type,
            id_a,
            id_b,
        } => {
            revoke_decision(&store, entity_type, &id_a, &id_b).await?;
            write_snapshot(&store, &cli.snapshot).await?;
            println!("revoked decision for {id_a} / {id_b}");
        }
    }

    Ok(())
}
