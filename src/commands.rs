use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, run_interactive_config, show_config};
use crate::database::sqlite::models::ImportStatus;
use crate::rag::{RagOrchestrator, create_generator};
use crate::store::{ImportOptions, ImportProgress, ImportStats, SearchOptions, VectorStore};

#[derive(Debug, Clone, Default, clap::Args)]
pub struct ImportArgs {
    /// Files or directories to import
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Walk directories recursively
    #[arg(short, long)]
    pub recursive: bool,
    /// Chunk size in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Characters shared between consecutive chunks
    #[arg(long)]
    pub overlap: Option<usize>,
    /// Re-embed chunks that are already stored
    #[arg(long)]
    pub force: bool,
    /// Store duplicate chunks again instead of skipping them
    #[arg(long)]
    pub no_skip_duplicates: bool,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct SearchArgs {
    pub query: String,
    #[arg(short, long)]
    pub limit: Option<usize>,
    /// Lowest similarity score to show, between 0 and 1
    #[arg(long)]
    pub min_score: Option<f32>,
    /// Only documents of this type (extension); repeatable
    #[arg(long = "type")]
    pub file_types: Vec<String>,
    /// Only documents created on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<NaiveDate>,
    /// Only documents created on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,
}

impl ImportArgs {
    #[inline]
    pub fn to_options(&self, config: &Config) -> ImportOptions {
        let mut options = ImportOptions::from_settings(&config.import);
        options.is_directory = self.recursive;
        options.force_update = self.force;
        options.skip_duplicates = !self.no_skip_duplicates;
        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        if let Some(overlap) = self.overlap {
            options.overlap_size = overlap;
        }
        options
    }
}

impl SearchArgs {
    #[inline]
    pub fn to_options(&self, config: &Config) -> SearchOptions {
        let mut options = SearchOptions::from_settings(&config.search);
        if let Some(limit) = self.limit {
            options.limit = limit;
        }
        if let Some(min_score) = self.min_score {
            options.min_score = min_score;
        }
        options.file_types.clone_from(&self.file_types);
        options.date_from = self.since.and_then(|date| date.and_hms_opt(0, 0, 0));
        options.date_to = self
            .until
            .and_then(|date| date.and_hms_milli_opt(23, 59, 59, 999));
        options
    }
}

fn open_store(data_dir: &Path) -> Result<VectorStore> {
    let config = Config::load(data_dir).context("Failed to load configuration")?;
    VectorStore::from_config(config).context("Failed to set up the vector store")
}

/// Show, initialize or interactively edit the configuration
#[inline]
pub fn configure(data_dir: &Path, show: bool, init: bool) -> Result<()> {
    if show {
        let config = Config::load(data_dir).context("Failed to load configuration")?;
        show_config(&config);
        return Ok(());
    }

    if init {
        let config = Config::with_base_dir(data_dir);
        if config.config_file_path().exists() {
            println!(
                "Configuration already exists at {}",
                config.config_file_path().display()
            );
            return Ok(());
        }
        config.save()?;
        println!(
            "Wrote default configuration to {}",
            config.config_file_path().display()
        );
        return Ok(());
    }

    run_interactive_config(data_dir)
}

#[inline]
pub async fn import(data_dir: &Path, args: &ImportArgs) -> Result<()> {
    let store = open_store(data_dir)?;
    let options = args.to_options(store.config());

    let cancellation = options.cancellation.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current file");
            cancellation.cancel();
        }
    });

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_msg}")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };
    let reporter = |progress: &ImportProgress| {
        bar.set_length(progress.total_files as u64);
        bar.set_position(progress.files_processed as u64);
        if let Some(ref file) = progress.current_file {
            bar.set_message(file.display().to_string());
        }
    };

    let result = store.import_files(&args.paths, &options, &reporter).await;
    bar.finish_and_clear();
    interrupt.abort();

    let stats = result.context("Import failed")?;
    print_import_summary(&stats);
    store.close().await.context("Failed to close the vector store")?;

    if !stats.success {
        anyhow::bail!(
            "Import finished but the index was not saved: {}",
            stats.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_import_summary(stats: &ImportStats) {
    let headline = if stats.cancelled {
        style("Import cancelled").yellow()
    } else if stats.files_failed > 0 || !stats.success {
        style("Import finished with errors").yellow()
    } else {
        style("Import complete").green()
    };
    println!("{}", headline.bold());
    println!(
        "  Files: {} processed, {} failed, {} total",
        stats.files_processed, stats.files_failed, stats.total_files
    );
    println!(
        "  Chunks: {} created, {} embedded, {} duplicates skipped",
        stats.chunks_created, stats.vector_count, stats.skipped_duplicates
    );
    if stats.failed_chunks > 0 {
        println!("  Chunks that failed to embed: {}", stats.failed_chunks);
    }
    println!("  Vectors in index: {}", stats.total_vectors);
    println!("  Duration: {} ms", stats.duration_ms);

    for error in &stats.errors {
        let hint = if error.retryable {
            style("retryable").yellow()
        } else {
            style("permanent").red()
        };
        println!("  {} {} [{}]", style(error.file.display()).dim(), error.error, hint);
    }
}

#[inline]
pub async fn search(data_dir: &Path, args: &SearchArgs) -> Result<()> {
    let store = open_store(data_dir)?;
    let options = args.to_options(store.config());
    let results = store.search(&args.query, &options).await?;

    if results.is_empty() {
        println!("No results above score {:.2}.", options.min_score);
    }
    for (position, result) in results.iter().enumerate() {
        let document = &result.document;
        println!(
            "{} {} {}",
            style(format!("{}.", position + 1)).bold(),
            style(document.title.as_deref().unwrap_or(&document.source)).cyan(),
            style(format!("(score {:.3})", result.score)).dim()
        );
        println!("   {}", style(&document.source).dim());
        println!("   {}", preview(&document.content, 240));
        println!();
    }

    store.close().await?;
    Ok(())
}

#[inline]
pub async fn ask(data_dir: &Path, question: &str) -> Result<()> {
    let store = Arc::new(open_store(data_dir)?);
    let generator = create_generator(&store.config().generation)
        .context("Failed to set up the text generator")?;
    let rag = RagOrchestrator::new(Arc::clone(&store), generator, store.config().rag.clone());

    let outcome = rag.ask(question).await;
    store.close().await?;

    match outcome {
        Ok(answer) => {
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("{}", style("Sources:").bold());
                for (position, source) in answer.sources.iter().enumerate() {
                    println!(
                        "  [{}] {} {}",
                        position + 1,
                        source.document.source,
                        style(format!("(score {:.3})", source.score)).dim()
                    );
                }
            }
            Ok(())
        }
        Err(failure) => {
            let hint = if failure.retryable {
                " Retrying may help."
            } else {
                ""
            };
            anyhow::bail!("{}{}", failure.message, hint)
        }
    }
}

#[inline]
pub async fn stats(data_dir: &Path, json: bool) -> Result<()> {
    let store = open_store(data_dir)?;
    let statistics = store.get_statistics().await?;
    let indexed = store.index_count().await?;
    store.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statistics)?);
        return Ok(());
    }

    let totals = &statistics.database_stats;
    println!("{}", style("📊 Doc Vault Statistics").bold().cyan());
    println!("  Documents: {}", totals.total_documents);
    println!("  Vectors: {} ({} in index)", totals.total_vectors, indexed);
    println!("  Chunks: {}", totals.total_chunks);
    println!("  Tokens: {}", totals.total_tokens);
    println!("  Content size: {} bytes", totals.total_content_size);
    println!(
        "  Average vectors per document: {:.2}",
        totals.average_vectors_per_doc
    );
    println!("  Last import: {}", format_time(totals.last_import_at));

    if let Some(ref current) = statistics.current_operation {
        println!();
        println!(
            "{} started {}",
            style("Import in progress").yellow(),
            format_time(Some(current.started_at))
        );
    }

    if !statistics.recent_operations.is_empty() {
        println!();
        println!("{}", style("Recent imports:").bold());
        for operation in &statistics.recent_operations {
            let status = match operation.status {
                ImportStatus::Completed => style(operation.status.to_string()).green(),
                ImportStatus::Failed => style(operation.status.to_string()).red(),
                ImportStatus::Running => style(operation.status.to_string()).yellow(),
            };
            println!(
                "  #{} {} {}: {} files, {} failed, {} ms",
                operation.id,
                format_time(Some(operation.started_at)),
                status,
                operation.files_processed,
                operation.files_failed,
                operation.total_processing_time
            );
        }
    }
    Ok(())
}

#[inline]
pub async fn verify(data_dir: &Path, repair: bool) -> Result<()> {
    let store = open_store(data_dir)?;
    let report = store.verify_consistency().await?;
    println!("{}", report.summary());

    if repair && !report.is_consistent {
        let repaired = store.repair_index().await?;
        println!(
            "Re-embedded {} documents, removed {} orphaned vectors",
            repaired.reembedded, repaired.removed_orphans
        );
        if !repaired.is_complete() {
            warn!("{} documents could not be re-embedded", repaired.failed.len());
            println!(
                "{}",
                style(format!(
                    "{} documents could not be re-embedded; run verify --repair again later",
                    repaired.failed.len()
                ))
                .yellow()
            );
        }
    } else if !report.is_consistent {
        println!("Run with --repair to rebuild the missing vectors.");
    }

    store.close().await?;
    Ok(())
}

#[inline]
pub async fn clear(data_dir: &Path, yes: bool) -> Result<()> {
    if !yes
        && !Confirm::new()
            .with_prompt("Delete every imported document and vector?")
            .default(false)
            .interact()?
    {
        println!("Nothing was deleted.");
        return Ok(());
    }

    let store = open_store(data_dir)?;
    store.clear_database().await?;
    store.close().await?;
    info!("Cleared store at {}", data_dir.display());
    println!("{}", style("All documents removed.").green());
    Ok(())
}

/// First `max_chars` characters on one line
fn preview(content: &str, max_chars: usize) -> String {
    let flattened = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let cut: String = flattened.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

fn format_time(time: Option<NaiveDateTime>) -> String {
    time.map_or_else(
        || "never".to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_args_override_settings() {
        let config = Config::default();
        let args = ImportArgs {
            paths: vec![PathBuf::from("docs")],
            recursive: true,
            chunk_size: Some(400),
            overlap: Some(40),
            force: true,
            no_skip_duplicates: false,
        };

        let options = args.to_options(&config);
        assert!(options.is_directory);
        assert!(options.force_update);
        assert!(options.skip_duplicates);
        assert_eq!(options.chunk_size, 400);
        assert_eq!(options.overlap_size, 40);
        assert_eq!(options.batch_size, config.import.batch_size);
    }

    #[test]
    fn search_args_cover_whole_days() {
        let config = Config::default();
        let args = SearchArgs {
            query: "q".to_string(),
            since: NaiveDate::from_ymd_opt(2024, 3, 1),
            until: NaiveDate::from_ymd_opt(2024, 3, 2),
            file_types: vec!["md".to_string()],
            ..SearchArgs::default()
        };

        let options = args.to_options(&config);
        assert_eq!(options.limit, config.search.default_limit);
        assert_eq!(options.file_types, vec!["md".to_string()]);
        assert_eq!(
            options.date_from.map(|d| d.to_string()).as_deref(),
            Some("2024-03-01 00:00:00")
        );
        assert_eq!(
            options.date_to.map(|d| d.to_string()).as_deref(),
            Some("2024-03-02 23:59:59.999")
        );
    }

    #[test]
    fn preview_truncates_on_characters() {
        assert_eq!(preview("short\n\ntext", 20), "short text");
        assert_eq!(preview("ääääää", 3), "äää…");
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_time(None), "never");
        let time = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .expect("should build time");
        assert_eq!(format_time(Some(time)), "2024-01-02 03:04:05");
    }

    #[tokio::test]
    async fn init_then_stats_on_fresh_directory() {
        let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
        configure(temp_dir.path(), false, true).expect("should write config");
        assert!(temp_dir.path().join("config.toml").exists());

        stats(temp_dir.path(), true).await.expect("should print stats");
        verify(temp_dir.path(), false).await.expect("should verify");
        clear(temp_dir.path(), true).await.expect("should clear");
    }
}
