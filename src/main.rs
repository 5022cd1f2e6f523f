use anyhow::Result;
use clap::{Parser, Subcommand};
use doc_vault::commands::{self, ImportArgs, SearchArgs};
use doc_vault::config::resolve_data_dir;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doc-vault")]
#[command(about = "A local document vector store with semantic search and question answering")]
#[command(version)]
struct Cli {
    /// Directory holding the configuration, metadata database and index
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure embedding and generation providers
    Config {
        /// Show current configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write the default configuration without prompting
        #[arg(long)]
        init: bool,
    },
    /// Import files or directories into the store
    Import(ImportArgs),
    /// Search imported documents by meaning
    Search(SearchArgs),
    /// Answer a question from the imported documents
    Ask {
        question: String,
    },
    /// Show document and import statistics
    Stats {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the metadata database with the similarity index
    Verify {
        /// Re-embed missing vectors and drop orphaned ones
        #[arg(long)]
        repair: bool,
    },
    /// Delete every imported document
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Config { show, init } => commands::configure(&data_dir, show, init)?,
        Commands::Import(args) => commands::import(&data_dir, &args).await?,
        Commands::Search(args) => commands::search(&data_dir, &args).await?,
        Commands::Ask { question } => commands::ask(&data_dir, &question).await?,
        Commands::Stats { json } => commands::stats(&data_dir, json).await?,
        Commands::Verify { repair } => commands::verify(&data_dir, repair).await?,
        Commands::Clear { yes } => commands::clear(&data_dir, yes).await?,
    }

    Ok(())
}
