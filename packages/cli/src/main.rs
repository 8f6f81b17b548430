mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use dedup_store::database::init_db;
use dedup_store::{Associations, DEFAULT_COLLECTION, DedupStore, OwnerRef, Record};
use serde::Serialize;
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(name = "dedup")]
#[command(about = "Operate a deduplicated media store", long_about = None)]
struct Cli {
    /// Config file path without extension. Default: config/dedup
    #[arg(long, global = true, env = "DEDUP_CONFIG")]
    config: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a file (or find the existing copy) without attaching it
    Ingest {
        file: PathBuf,
        /// Original name. Default: the file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mime: Option<String>,
    },
    /// Store a file and attach it to an owner
    Attach {
        owner_type: String,
        owner_id: String,
        file: PathBuf,
        #[arg(long, default_value = DEFAULT_COLLECTION)]
        collection: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Detach a record from an owner, in one collection or all of them
    Detach {
        owner_type: String,
        owner_id: String,
        digest: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Detach everything an owner holds; run before deleting the owner
    DetachAll { owner_type: String, owner_id: String },
    /// List an owner's records in a collection
    List {
        owner_type: String,
        owner_id: String,
        #[arg(long, default_value = DEFAULT_COLLECTION)]
        collection: String,
    },
    /// Show the record for a digest
    Show { digest: String },
    /// Print store statistics
    Stats,
    /// Reap records that were never attached
    Prune {
        /// Grace period in seconds
        #[arg(long, default_value_t = 86_400)]
        older_than_secs: u64,
    },
}

#[derive(Serialize)]
struct RecordView<'a> {
    #[serde(flatten)]
    record: &'a Record,
    storage_key: String,
    url: Option<String>,
}

fn print_record(store: &DedupStore, record: &Record) -> anyhow::Result<()> {
    let view = RecordView {
        record,
        storage_key: store.storage_key(record),
        url: store.url(record),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn find_record(store: &DedupStore, digest: &str) -> anyhow::Result<Record> {
    match store.find_by_hash(digest).await? {
        Some(record) => Ok(record),
        None => bail!("no record with digest {digest}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = config::AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(
        DedupStore::open(config.store, db)
            .await
            .context("Failed to open dedup store")?,
    );
    let media = Associations::new(store.clone());

    match cli.command {
        Commands::Ingest { file, name, mime } => {
            let record = store
                .ingest_from_path(&file, name.as_deref(), mime.as_deref())
                .await
                .with_context(|| format!("Failed to ingest {}", file.display()))?;
            print_record(&store, &record)?;
        }
        Commands::Attach {
            owner_type,
            owner_id,
            file,
            collection,
            name,
        } => {
            let owner = OwnerRef::new(owner_type, owner_id);
            let record = media
                .attach_path(&owner, &file, &collection, name.as_deref())
                .await
                .with_context(|| format!("Failed to attach {} to {owner}", file.display()))?;
            print_record(&store, &record)?;
        }
        Commands::Detach {
            owner_type,
            owner_id,
            digest,
            collection,
        } => {
            let owner = OwnerRef::new(owner_type, owner_id);
            let record = find_record(&store, &digest).await?;
            let removed = media
                .detach(&owner, &record, collection.as_deref())
                .await
                .with_context(|| format!("Failed to detach {digest} from {owner}"))?;
            info!(%owner, removed, "Detached");
        }
        Commands::DetachAll {
            owner_type,
            owner_id,
        } => {
            let owner = OwnerRef::new(owner_type, owner_id);
            let removed = media
                .detach_all(&owner)
                .await
                .with_context(|| format!("Failed to detach media from {owner}"))?;
            info!(%owner, removed, "Detached all");
        }
        Commands::List {
            owner_type,
            owner_id,
            collection,
        } => {
            let owner = OwnerRef::new(owner_type, owner_id);
            for record in media.records(&owner, &collection).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.digest, record.size, record.reference_count, record.original_name
                );
            }
        }
        Commands::Show { digest } => {
            let record = find_record(&store, &digest).await?;
            print_record(&store, &record)?;
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("records:      {}", stats.records);
            println!("associations: {}", stats.associations);
            println!("total bytes:  {}", stats.total_bytes);
            println!("unreferenced: {}", stats.unreferenced);
        }
        Commands::Prune { older_than_secs } => {
            let reaped = store
                .prune_unreferenced(Duration::from_secs(older_than_secs))
                .await
                .context("Prune failed")?;
            info!(reaped, "Prune complete");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn attach_defaults_to_default_collection() {
        let cli = Cli::parse_from(["dedup", "attach", "post", "42", "photo.png"]);
        match cli.command {
            Commands::Attach { collection, .. } => assert_eq!(collection, DEFAULT_COLLECTION),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn detach_collection_is_optional() {
        let cli = Cli::parse_from(["dedup", "detach", "post", "42", "abcd"]);
        assert!(matches!(
            cli.command,
            Commands::Detach {
                collection: None,
                ..
            }
        ));
    }
}
