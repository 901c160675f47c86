use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};
use unigram_core::{ingest, BuildControl, DocumentStore, IndexBuilder, QueryEngine, SledStore};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load documents and build the unigram index", long_about = None)]
struct Cli {
    /// Store directory
    #[arg(long, default_value = "./data/db")]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert every row of a `docid,content` data file
    Upload {
        #[arg(long)]
        input: String,
    },
    /// Rebuild the index from all stored documents
    Build {
        /// Abort the build after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run a query and print the ranked page as JSON
    Search {
        #[arg(long)]
        q: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print a stored document
    Lookup {
        #[arg(long)]
        id: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let store = SledStore::open(&cli.db).with_context(|| format!("opening store at {}", cli.db))?;

    match cli.command {
        Commands::Upload { input } => {
            let count = ingest::upload(&store, &input)?;
            store.flush()?;
            println!("{}", serde_json::json!({ "count": count }));
        }
        Commands::Build { timeout_secs } => {
            let control = match timeout_secs {
                Some(secs) => BuildControl::with_deadline(Instant::now() + Duration::from_secs(secs)),
                None => BuildControl::new(),
            };
            let stats = IndexBuilder::default().build(&store, &store, &control)?;
            store.flush()?;
            if stats.skipped_documents > 0 {
                tracing::warn!(skipped = stats.skipped_documents, "some documents had no content");
            }
            println!(
                "{}",
                serde_json::json!({ "unigram_count": stats.term_count, "document_count": stats.document_count })
            );
        }
        Commands::Search { q, offset, limit } => {
            let results = QueryEngine::default().search(&store, &q, offset, limit)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Lookup { id } => match DocumentStore::get(&store, &id)? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
            None => println!("{{}}"),
        },
    }
    Ok(())
}
