//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;

use rulevault_core::{FormattedResult, IngestReport, ProgressReporter, RagPipeline};
use rulevault_retriever::CollectionStats;
use rulevault_shared::{
    AppConfig, EmbeddingConfig, Metadata, expand_home, init_config, load_config, load_config_from,
};
use rulevault_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// rulevault: searchable, cited knowledge bases from rulebook PDFs.
#[derive(Parser)]
#[command(
    name = "rulevault",
    version,
    about = "Ingest tabletop-RPG rulebook PDFs and run cited rule searches.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.rulevault/rulevault.toml).
    #[arg(long, global = true, env = "RULEVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Extract, chunk, embed, and index a rulebook PDF.
    Ingest {
        /// Path to the PDF.
        pdf: PathBuf,

        /// Game system the book belongs to (e.g. dnd5e).
        #[arg(short, long)]
        system: String,

        /// Book name (defaults to the file name).
        #[arg(short, long)]
        book: Option<String>,

        /// Book version or printing.
        #[arg(long = "book-version")]
        book_version: Option<String>,

        /// Drop and recreate the system's collection first.
        #[arg(long)]
        recreate: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search indexed rules.
    Search {
        /// Natural-language query.
        query: String,

        #[arg(short, long)]
        system: String,

        /// Maximum results (defaults to the configured search limit).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Restrict to content types (repeatable), e.g. spell, feat, table.
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Payload filter `key=value` (repeatable). JSON values are parsed,
        /// e.g. `page_number={"min":100}` or `source_book=["PHB","DMG"]`.
        /// Keys other than source_book, source_version, page_number and
        /// chunk_type match chunk metadata, e.g. `spell_level=3`.
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Find indexed content similar to a piece of text.
    Similar {
        /// Reference text.
        text: String,

        #[arg(short, long)]
        system: String,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show collection statistics for a game system.
    Stats {
        #[arg(short, long)]
        system: String,
    },

    /// List recorded ingestion runs.
    Runs {
        /// Only runs for this game system.
        #[arg(short, long)]
        system: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Embedding cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete cached embeddings for a model (the configured one by default).
    Clear {
        /// Model whose vectors to delete.
        #[arg(long, conflicts_with = "all")]
        model: Option<String>,

        /// Delete vectors for every model.
        #[arg(long)]
        all: bool,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rulevault=info",
        1 => "rulevault=debug",
        _ => "rulevault=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Ingest {
            pdf,
            system,
            book,
            book_version,
            recreate,
            json,
        } => {
            let config = resolve_config(config_path)?;
            cmd_ingest(
                &config,
                &pdf,
                &system,
                book.as_deref(),
                book_version.as_deref(),
                recreate,
                json,
            )
            .await
        }
        Command::Search {
            query,
            system,
            limit,
            types,
            filters,
            json,
        } => {
            let config = resolve_config(config_path)?;
            cmd_search(&config, &query, &system, limit, &types, &filters, json).await
        }
        Command::Similar {
            text,
            system,
            limit,
            json,
        } => {
            let config = resolve_config(config_path)?;
            cmd_similar(&config, &text, &system, limit, json).await
        }
        Command::Stats { system } => {
            let config = resolve_config(config_path)?;
            cmd_stats(&config, &system).await
        }
        Command::Runs { system, limit } => {
            let config = resolve_config(config_path)?;
            cmd_runs(&config, system.as_deref(), limit).await
        }
        Command::Cache { action } => match action {
            CacheAction::Clear { model, all } => {
                let config = resolve_config(config_path)?;
                cmd_cache_clear(&config, model.as_deref(), all).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

async fn cmd_ingest(
    config: &AppConfig,
    pdf: &Path,
    system: &str,
    book: Option<&str>,
    version: Option<&str>,
    recreate: bool,
    json: bool,
) -> Result<()> {
    info!(pdf = %pdf.display(), system, recreate, "ingesting rulebook");

    let pipeline = RagPipeline::new(config).await?;
    let reporter = CliProgress::new();
    let outcome = pipeline
        .process_pdf(pdf, system, book, version, recreate, &reporter)
        .await;
    reporter.clear();
    let report = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let stages = &report.stages;
    println!();
    println!("  Rulebook ingested!");
    println!("  Book:       {}", report.book_name);
    println!("  System:     {}", report.game_system);
    println!("  Fragments:  {}", stages.extraction.content_items);
    for (content_type, count) in &stages.extraction.content_types {
        println!("    {content_type:<14} {count}");
    }
    println!(
        "  Chunks:     {} (avg {:.0} chars)",
        stages.chunking.chunks_created, stages.chunking.avg_chunk_size
    );
    println!(
        "  Embeddings: {} ({}, dim {})",
        stages.embedding.embeddings_generated, stages.embedding.model, stages.embedding.dimension
    );
    println!(
        "  Indexed:    {} into {}",
        stages.indexing.indexed_count, stages.indexing.collection
    );
    println!("  Time:       {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn embedded(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Generating embeddings [{current}/{total}]"));
    }

    fn done(&self, _report: &IngestReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Query commands
// ---------------------------------------------------------------------------

async fn cmd_search(
    config: &AppConfig,
    query: &str,
    system: &str,
    limit: Option<usize>,
    types: &[String],
    filters: &[String],
    json: bool,
) -> Result<()> {
    let filters = parse_filters(filters)?;
    let pipeline = RagPipeline::new(config).await?;
    let results = pipeline
        .search(
            query,
            system,
            limit,
            (!filters.is_empty()).then_some(&filters),
            types,
        )
        .await?;
    print_results(&results, json)
}

async fn cmd_similar(
    config: &AppConfig,
    text: &str,
    system: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let pipeline = RagPipeline::new(config).await?;
    let results = pipeline.find_similar(text, system, limit).await?;
    print_results(&results, json)
}

fn print_results(results: &[FormattedResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{:>2}. [{:.3}] {}", i + 1, result.score, result.citation);
        println!("    {}", result.source_reference);
        println!("    {}", snippet(&result.text, 240));
        println!();
    }
    Ok(())
}

/// First `max_chars` characters on one line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type,
/// anything else is a string.
fn parse_filters(pairs: &[String]) -> Result<Metadata> {
    let mut filters = Metadata::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| eyre!("invalid filter '{pair}': expected key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(eyre!("invalid filter '{pair}': empty key"));
        }
        let value = serde_json::from_str::<Value>(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
        filters.insert(key.to_string(), value);
    }
    Ok(filters)
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

async fn cmd_stats(config: &AppConfig, system: &str) -> Result<()> {
    let pipeline = RagPipeline::new(config).await?;
    let model = pipeline.embedder().model_info();
    println!(
        "  Model:      {} ({}, dim {}, max {} tokens)",
        model.name, model.provider, model.dimension, model.max_sequence_length
    );
    match pipeline.stats(system).await {
        CollectionStats::Available {
            collection_name,
            vector_count,
            indexed_count,
            status,
            config,
        } => {
            println!("  Collection: {collection_name}");
            println!("  Status:     {status}");
            println!("  Vectors:    {vector_count}");
            println!("  Indexed:    {indexed_count}");
            println!("  Dimension:  {} ({})", config.dimension, config.distance);
        }
        CollectionStats::Unavailable {
            collection_name,
            error,
        } => {
            println!("  Collection: {collection_name}");
            println!("  Error:      {error}");
        }
    }
    Ok(())
}

async fn cmd_runs(config: &AppConfig, system: Option<&str>, limit: u32) -> Result<()> {
    let db_path = expand_home(&config.storage.db_path);
    if !db_path.exists() {
        println!("No ingestion runs recorded.");
        return Ok(());
    }

    let storage = Storage::open_readonly(&db_path).await?;
    let runs = storage.list_ingest_runs(system, limit).await?;
    if runs.is_empty() {
        println!("No ingestion runs recorded.");
        return Ok(());
    }

    for run in runs {
        let stage = run
            .failed_stage
            .as_deref()
            .map(|s| format!(" at {s}"))
            .unwrap_or_default();
        println!(
            "{}  {:<9}{}  {}  {}  {}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.status.as_str(),
            stage,
            run.game_system,
            run.book_name.as_deref().unwrap_or("-"),
            run.pdf_path
        );
    }
    Ok(())
}

async fn cmd_cache_clear(config: &AppConfig, model: Option<&str>, all: bool) -> Result<()> {
    let embedding = EmbeddingConfig::from(config);
    let Some(db_path) = embedding.cache_path.filter(|p| p.exists()) else {
        println!("No embedding cache found.");
        return Ok(());
    };

    let model = match (all, model) {
        (true, _) => None,
        (false, Some(model)) => Some(model),
        (false, None) => Some(embedding.model_name.as_str()),
    };
    let storage = Storage::open(&db_path).await?;
    let removed = storage.clear_embeddings(model).await?;
    info!(removed, model = model.unwrap_or("*"), "cleared embedding cache");
    println!(
        "Removed {removed} cached embeddings ({}).",
        model.unwrap_or("all models")
    );
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_keep_json_types() {
        let filters = parse_filters(&[
            "source_book=PHB".to_string(),
            "page_number={\"min\": 100}".to_string(),
            "metadata.spell_level=[\"1\",\"2\"]".to_string(),
        ])
        .unwrap();
        assert_eq!(filters["source_book"], Value::from("PHB"));
        assert_eq!(filters["page_number"]["min"], Value::from(100));
        assert!(filters["metadata.spell_level"].is_array());
    }

    #[test]
    fn filter_without_equals_is_rejected() {
        assert!(parse_filters(&["source_book".to_string()]).is_err());
        assert!(parse_filters(&["=PHB".to_string()]).is_err());
    }

    #[test]
    fn cli_parses_cache_clear() {
        let cli = Cli::try_parse_from(["rulevault", "cache", "clear", "--model", "bge-small"]).unwrap();
        match cli.command {
            Command::Cache {
                action: CacheAction::Clear { model, all },
            } => {
                assert_eq!(model.as_deref(), Some("bge-small"));
                assert!(!all);
            }
            _ => panic!("expected cache clear"),
        }
        assert!(Cli::try_parse_from(["rulevault", "cache", "clear", "--model", "m", "--all"]).is_err());
    }

    #[tokio::test]
    async fn cache_clear_removes_only_the_configured_model() {
        let db = std::env::temp_dir().join(format!("rv_cli_{}.db", std::process::id()));
        let storage = Storage::open(&db).await.unwrap();
        storage.put_embedding("a", "model-a", &[1.0]).await.unwrap();
        storage.put_embedding("b", "model-b", &[1.0]).await.unwrap();
        drop(storage);

        let mut config = AppConfig::default();
        config.storage.db_path = db.display().to_string();
        config.embedding.model_name = "model-a".into();
        cmd_cache_clear(&config, None, false).await.unwrap();

        let storage = Storage::open(&db).await.unwrap();
        assert_eq!(storage.count_embeddings(Some("model-a")).await.unwrap(), 0);
        assert_eq!(storage.count_embeddings(Some("model-b")).await.unwrap(), 1);
        drop(storage);
        let _ = std::fs::remove_file(&db);
    }

    #[test]
    fn snippet_flattens_and_truncates() {
        assert_eq!(snippet("Casting Time:\n1 action", 100), "Casting Time: 1 action");
        assert_eq!(snippet("abcdef", 3), "abc...");
    }

    #[test]
    fn cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "rulevault", "search", "fireball", "--system", "dnd5e", "-t", "spell", "-t", "table",
            "--filter", "source_book=PHB", "--limit", "3",
        ])
        .unwrap();
        match cli.command {
            Command::Search {
                types, limit, filters, ..
            } => {
                assert_eq!(types, vec!["spell", "table"]);
                assert_eq!(limit, Some(3));
                assert_eq!(filters, vec!["source_book=PHB"]);
            }
            _ => panic!("expected search"),
        }
    }
}
