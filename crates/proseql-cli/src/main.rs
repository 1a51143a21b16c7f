//! ProseQL command-line interface.
//!
//! A small `clap`-based binary exercising a [`Database`] end-to-end:
//! seed records from a file, run ad-hoc queries, watch a collection for
//! live changes, and perform single-record CRUD — plus the
//! confirmation-prompt helper collaborator described abstractly for
//! destructive operations.

use std::io::{IsTerminal, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proseql_core::{CollectionConfig, Database, DatabaseConfig, Query};
use proseql_storage::{CodecRegistry, FsStorageAdapter};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, Level};

mod telemetry;

use telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "proseql")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Embedded document database explorer", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the database descriptor (TOML/YAML listing collections)
    #[arg(long, global = true, default_value = "proseql.toml")]
    descriptor: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new descriptor file with one empty collection
    Init {
        /// Collection name to seed the descriptor with
        #[arg(default_value = "items")]
        collection: String,
    },

    /// Bulk-create records into a collection from a JSON array file
    Seed {
        /// Target collection
        collection: String,
        /// Path to a JSON file containing an array of records
        file: PathBuf,
    },

    /// Create one record from an inline JSON object
    Create {
        collection: String,
        /// Record JSON, e.g. '{"id":"1","name":"Ada"}'
        data: String,
    },

    /// Fetch one record by id
    Get { collection: String, id: String },

    /// Run a filter query and print matching records as JSON
    Query {
        collection: String,
        /// Filter JSON (default: match everything)
        #[arg(short, long, default_value = "{}")]
        filter: String,
        #[arg(short, long)]
        limit: Option<f64>,
    },

    /// Patch one record by id
    Update {
        collection: String,
        id: String,
        /// Patch JSON, e.g. '{"name":"New name"}'
        patch: String,
    },

    /// Delete one record by id
    Delete {
        collection: String,
        id: String,
        /// Soft-delete (mark deleted, keep the row) instead of removing it
        #[arg(long)]
        soft: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Subscribe to a collection and print every change until interrupted
    Watch {
        collection: String,
        #[arg(short, long, default_value = "{}")]
        filter: String,
    },
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    collections: Vec<DescriptorCollection>,
}

#[derive(Debug, Deserialize)]
struct DescriptorCollection {
    name: String,
    file: Option<PathBuf>,
    #[serde(default)]
    version: Option<u32>,
}

/// Print `prompt [y/N] `, read one line, accept `y|yes|n|no` case-
/// insensitively, re-prompting on anything else. Automatically answers "no" when stdin isn't a terminal,
/// reporting why it skipped rather than hanging on a read that can never
/// complete interactively.
fn confirm(prompt: &str, force: bool) -> Result<bool> {
    if force {
        info!(event = "confirm.skipped", reason = "force");
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        info!(event = "confirm.skipped", reason = "stdin is not a terminal");
        return Ok(false);
    }

    loop {
        print!("{prompt} [y/N] ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).context("failed to read confirmation from stdin")?;
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" | "" => return Ok(false),
            _ => println!("Please answer y or n."),
        }
    }
}

async fn load_descriptor(path: &PathBuf) -> Result<Descriptor> {
    if !path.exists() {
        return Ok(Descriptor { collections: Vec::new() });
    }
    let codecs = CodecRegistry::with_builtins();
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let bytes = std::fs::read(path).with_context(|| format!("failed to read descriptor {path:?}"))?;
    let value = codecs.deserialize(&bytes, extension).with_context(|| format!("failed to parse descriptor {path:?}"))?;
    serde_json::from_value(value).context("descriptor did not match the expected shape")
}

async fn open_database(descriptor_path: &PathBuf) -> Result<Database> {
    let descriptor = load_descriptor(descriptor_path).await?;
    let base_dir = descriptor_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));

    let mut builder = DatabaseConfig::builder();
    for entry in descriptor.collections {
        let mut collection = CollectionConfig::builder(entry.name);
        if let Some(file) = entry.file {
            collection = collection.file(base_dir.join(file));
        }
        if let Some(version) = entry.version {
            collection = collection.version(version);
        }
        builder = builder.collection(collection.build());
    }
    let config = builder.persistence_debounce(Duration::from_millis(250)).build();

    let storage: Arc<dyn proseql_storage::StorageAdapter> = Arc::new(FsStorageAdapter::new());
    Database::open(config, storage, Vec::new()).await.context("failed to open database")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Init { collection } => cmd_init(&cli.descriptor, &collection),
        Commands::Seed { collection, file } => cmd_seed(&cli.descriptor, &collection, &file).await,
        Commands::Create { collection, data } => cmd_create(&cli.descriptor, &collection, &data).await,
        Commands::Get { collection, id } => cmd_get(&cli.descriptor, &collection, &id).await,
        Commands::Query { collection, filter, limit } => cmd_query(&cli.descriptor, &collection, &filter, limit).await,
        Commands::Update { collection, id, patch } => cmd_update(&cli.descriptor, &collection, &id, &patch).await,
        Commands::Delete { collection, id, soft, force } => cmd_delete(&cli.descriptor, &collection, &id, soft, force).await,
        Commands::Watch { collection, filter } => cmd_watch(&cli.descriptor, &collection, &filter).await,
    }
}

fn cmd_init(descriptor_path: &PathBuf, collection: &str) -> Result<()> {
    let toml = format!("[[collections]]\nname = \"{collection}\"\nfile = \"{collection}.json\"\n");
    std::fs::write(descriptor_path, toml).with_context(|| format!("failed to write descriptor {descriptor_path:?}"))?;
    println!("Initialized descriptor at {descriptor_path:?} with collection '{collection}'");
    Ok(())
}

async fn cmd_seed(descriptor_path: &PathBuf, collection: &str, file: &PathBuf) -> Result<()> {
    let db = open_database(descriptor_path).await?;
    let handle = db.collection(collection)?;

    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
    let records: Vec<Value> = serde_json::from_str(&content).context("seed file must contain a JSON array of records")?;

    let mut created = 0usize;
    for record in records {
        handle.create(record)?;
        created += 1;
    }
    db.flush().await;
    println!("Seeded {created} record(s) into '{collection}'");
    Ok(())
}

async fn cmd_create(descriptor_path: &PathBuf, collection: &str, data: &str) -> Result<()> {
    let db = open_database(descriptor_path).await?;
    let input: Value = serde_json::from_str(data).context("data must be valid JSON")?;
    let record = db.collection(collection)?.create(input)?;
    db.flush().await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_get(descriptor_path: &PathBuf, collection: &str, id: &str) -> Result<()> {
    let db = open_database(descriptor_path).await?;
    match db.collection(collection)?.find_by_id(id)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("Not found: {collection}/{id}"),
    }
    Ok(())
}

async fn cmd_query(descriptor_path: &PathBuf, collection: &str, filter: &str, limit: Option<f64>) -> Result<()> {
    let db = open_database(descriptor_path).await?;
    let filter_value: Value = serde_json::from_str(filter).context("filter must be valid JSON")?;
    let query = Query { filter: filter_value, limit, ..Query::default() };
    let records = db.collection(collection)?.find(&query)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    println!("({} record(s))", records_len(&records));
    Ok(())
}

fn records_len(records: &[Value]) -> usize {
    records.len()
}

async fn cmd_update(descriptor_path: &PathBuf, collection: &str, id: &str, patch: &str) -> Result<()> {
    let db = open_database(descriptor_path).await?;
    let patch_value: Value = serde_json::from_str(patch).context("patch must be valid JSON")?;
    let record = db.collection(collection)?.update(id, patch_value)?;
    db.flush().await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_delete(descriptor_path: &PathBuf, collection: &str, id: &str, soft: bool, force: bool) -> Result<()> {
    if !confirm(&format!("Delete {collection}/{id}?"), force)? {
        println!("Aborted.");
        return Ok(());
    }

    let db = open_database(descriptor_path).await?;
    let record = db.collection(collection)?.delete(id, soft)?;
    db.flush().await;
    println!("Deleted {collection}/{id}");
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_watch(descriptor_path: &PathBuf, collection: &str, filter: &str) -> Result<()> {
    let db = open_database(descriptor_path).await?;
    let filter_value: Value = serde_json::from_str(filter).context("filter must be valid JSON")?;
    let query = Query { filter: filter_value, ..Query::default() };

    println!("Watching '{collection}' (Ctrl-C to stop)...");
    let mut watch = db.collection(collection)?.watch(query, Some(Duration::from_millis(50)))?;
    while let Some(records) = watch.receiver.recv().await {
        println!("{}", serde_json::to_string_pretty(&records)?);
    }
    Ok(())
}
