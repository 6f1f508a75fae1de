//! CSSA CLI - Command-line interface
//!
//! Usage:
//!   cssa ingest <dir>
//!   cssa search <query> [-k 4] [--filter key=value]... [--with-score]
//!   cssa count
//!   cssa collections
//!   cssa embed <sentence>... [--remote]
//!   cssa translate <text> --to <lang> [--from <lang>]

mod ingest;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cssa_core::{AppConfig, LoggingConfig, MetadataFilter};
use cssa_llm::{create_llm_client, TranslationChain};
use cssa_parser::{ChunkConfig, ParserRegistry};
use cssa_vector::{connect_index, create_embedding_client, LocalStore, VectorDbManager};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cssa")]
#[command(about = "Vector store and LLM helper CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still take precedence)
    #[arg(long, global = true, env = "CSSA_CONFIG")]
    config: Option<PathBuf>,

    /// Use the managed remote index instead of the local store
    #[arg(long, global = true)]
    remote: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, chunk and store every PDF in a directory
    Ingest {
        /// Directory containing PDF files
        dir: PathBuf,
    },
    /// Search stored documents
    Search {
        /// Query text
        query: String,

        /// Number of results
        #[arg(short, default_value_t = 4)]
        k: usize,

        /// Metadata equality filter, repeatable
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Print similarity scores
        #[arg(long)]
        with_score: bool,
    },
    /// Count stored documents
    Count,
    /// List collections or indexes
    Collections,
    /// Embed sentences and store them
    Embed {
        #[arg(required = true)]
        sentences: Vec<String>,
    },
    /// Translate text with the configured LLM
    Translate {
        text: String,

        /// Target language
        #[arg(long)]
        to: String,

        /// Source language
        #[arg(long, default_value = "English")]
        from: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json_format {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .with(filter)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

async fn open_store(
    config: &AppConfig,
    remote: bool,
    collection: Option<&str>,
) -> anyhow::Result<Box<dyn VectorDbManager>> {
    let embedder = create_embedding_client(&config.llm)?;

    if remote {
        let manager = connect_index(&config.remote, embedder)
            .await
            .context("failed to connect to the remote index")?;
        return Ok(Box::new(manager));
    }

    let mut local = config.local.clone();
    if let Some(collection) = collection {
        local.collection = collection.to_string();
    }
    let store = LocalStore::from_config(&local, embedder)
        .await
        .with_context(|| format!("failed to open local store at {}", local.path.display()))?;
    Ok(Box::new(store))
}

fn parse_filter(raw: &[String]) -> anyhow::Result<Option<MetadataFilter>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let mut filter = MetadataFilter::new();
    for condition in raw {
        let (key, value) = MetadataFilter::parse_condition(condition)?;
        filter = filter.equals(key, value);
    }
    Ok(Some(filter))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Ingest { dir } => {
            let collection = config.ingest.collection.as_str();
            let store = open_store(&config, cli.remote, Some(collection)).await?;
            let chunking = ChunkConfig::new(config.ingest.chunk_size, config.ingest.chunk_overlap);

            let summary =
                ingest::ingest_dir(&dir, &ParserRegistry::with_defaults(), store.as_ref(), &chunking)
                    .await?;
            println!(
                "Ingested {} chunks from {} files",
                summary.chunks, summary.files
            );
        }
        Commands::Search {
            query,
            k,
            filters,
            with_score,
        } => {
            let filter = parse_filter(&filters)?;
            let store = open_store(&config, cli.remote, None).await?;

            let results = store
                .search_documents(&query, k, filter.as_ref(), with_score)
                .await?;
            for (rank, result) in results.iter().enumerate() {
                let id = result.document.id.as_deref().unwrap_or("-");
                match result.score {
                    Some(score) => println!("{}. [{score:.4}] {id}", rank + 1),
                    None => println!("{}. {id}", rank + 1),
                }
                println!("   {}", result.document.content);
                if !result.document.metadata.is_empty() {
                    println!("   {}", serde_json::to_string(&result.document.metadata)?);
                }
            }
        }
        Commands::Count => {
            let store = open_store(&config, cli.remote, None).await?;
            println!("{}", store.count_documents().await?);
        }
        Commands::Collections => {
            let store = open_store(&config, cli.remote, None).await?;
            for name in store.list_collections().await? {
                println!("{name}");
            }
        }
        Commands::Embed { sentences } => {
            let store = open_store(&config, cli.remote, None).await?;
            for id in store.embed_and_upsert(sentences, None, None).await? {
                println!("{id}");
            }
        }
        Commands::Translate { text, to, from } => {
            let llm = create_llm_client(&config.llm)?;
            let chain = TranslationChain::with_source_lang(llm, from);
            println!("{}", chain.translate(&text, &to).await?);
        }
    }

    Ok(())
}
