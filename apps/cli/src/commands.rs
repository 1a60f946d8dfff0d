//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use bibgraph_core::cleaning::clean_author_links;
use bibgraph_core::ingest::{IngestProgress, Ingestor, build_all_networks};
use bibgraph_core::topwords::{SimpleLemmatizer, top_words_for_affiliations, top_words_for_persons};
use bibgraph_shared::{
    AppConfig, EntityKind, IngestConfig, ProviderRecord, config_file_path, expand_home,
    init_config, load_config,
};
use bibgraph_similarity::HttpSimilarityIndex;
use bibgraph_storage::Store;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bibgraph — reconcile bibliographic records into one canonical graph.
#[derive(Parser)]
#[command(
    name = "bibgraph",
    version,
    about = "Reconcile provider feeds into a canonical bibliographic graph and derive co-authorship networks.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the store database path from the config file.
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Entity kind of a provider feed.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum FeedKind {
    Work,
    Person,
    Affiliation,
    Source,
}

impl From<FeedKind> for EntityKind {
    fn from(kind: FeedKind) -> Self {
        match kind {
            FeedKind::Work => EntityKind::Work,
            FeedKind::Person => EntityKind::Person,
            FeedKind::Affiliation => EntityKind::Affiliation,
            FeedKind::Source => EntityKind::Source,
        }
    }
}

/// Seed dimension for network building.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum NetworkKind {
    Affiliations,
    Persons,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest a provider feed (JSON lines of already-mapped records).
    Ingest {
        /// Path to the feed file.
        feed: PathBuf,

        /// Entity kind carried by the feed.
        #[arg(short, long)]
        kind: FeedKind,

        /// Provider name recorded in entity provenance.
        #[arg(short, long)]
        source: String,

        /// Worker pool size (overrides config).
        #[arg(short, long)]
        workers: Option<usize>,

        /// Only reconcile against existing entities; never insert.
        #[arg(long)]
        reconcile_only: bool,
    },

    /// Build co-authorship networks for every affiliation or person.
    Networks {
        /// Seed dimension.
        #[arg(short, long)]
        kind: NetworkKind,

        /// Maximum author/affiliation count per qualifying work
        /// (overrides config).
        #[arg(long)]
        max_authors: Option<usize>,

        /// Worker pool size (overrides config).
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Extract top title words for affiliations and persons.
    TopWords,

    /// Clear author links contradicted by curated affiliation histories.
    CleanAuthors,

    /// Show entity counts per collection.
    Stats,

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

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bibgraph=info",
        1 => "bibgraph=debug",
        _ => "bibgraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let db_override = cli.db.clone();

    match cli.command {
        Command::Ingest {
            feed,
            kind,
            source,
            workers,
            reconcile_only,
        } => {
            cmd_ingest(
                &config,
                db_override.as_deref(),
                &feed,
                kind,
                &source,
                workers,
                reconcile_only,
            )
            .await
        }
        Command::Networks {
            kind,
            max_authors,
            workers,
        } => cmd_networks(&config, db_override.as_deref(), kind, max_authors, workers).await,
        Command::TopWords => cmd_top_words(&config, db_override.as_deref()).await,
        Command::CleanAuthors => cmd_clean_authors(&config, db_override.as_deref()).await,
        Command::Stats => cmd_stats(&config, db_override.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Open the canonical store from config (or the `--db` override).
async fn open_store(config: &AppConfig, db_override: Option<&str>) -> Result<Store> {
    let path = expand_home(db_override.unwrap_or(&config.store.db_path));
    Ok(Store::open(&path).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(
    config: &AppConfig,
    db_override: Option<&str>,
    feed: &Path,
    kind: FeedKind,
    source: &str,
    workers: Option<usize>,
    reconcile_only: bool,
) -> Result<()> {
    let records = read_feed(feed, kind.into())?;
    if records.is_empty() {
        return Err(eyre!("feed '{}' contains no records", feed.display()));
    }

    let mut ingest_config = IngestConfig::from(config);
    if let Some(workers) = workers {
        ingest_config.workers = workers;
    }
    if reconcile_only {
        ingest_config.insert_all = false;
    }

    let store = open_store(config, db_override).await?;
    let index = match config.similarity.base_url.as_deref() {
        Some(base_url) => Some(HttpSimilarityIndex::new(
            base_url,
            Some(config.similarity.timeout_secs),
        )?),
        None => None,
    };

    info!(
        feed = %feed.display(),
        records = records.len(),
        source,
        workers = ingest_config.workers,
        similarity = index.is_some(),
        "ingesting feed"
    );

    let ingestor = Ingestor::new(store, index, ingest_config, config.similarity.max_hits);
    let reporter = CliProgress::new(records.len());
    let stats = ingestor.run(records, source, &reporter).await?;
    reporter.finish();

    println!();
    println!("  Feed ingested.");
    println!("  Processed: {}", stats.processed);
    println!("  Inserted:  {}", stats.inserted);
    println!("  Updated:   {}", stats.updated);
    println!("  Skipped:   {}", stats.skipped);
    println!("  Failed:    {}", stats.failed);
    println!();

    Ok(())
}

/// Parse a JSON-lines feed, pinning every record to the declared kind.
fn read_feed(path: &Path, kind: EntityKind) -> Result<Vec<ProviderRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read feed '{}': {e}", path.display()))?;

    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut record: ProviderRecord = serde_json::from_str(line)
            .map_err(|e| eyre!("{}:{}: bad record: {e}", path.display(), lineno + 1))?;
        record.kind = kind;
        records.push(record);
    }
    Ok(records)
}

async fn cmd_networks(
    config: &AppConfig,
    db_override: Option<&str>,
    kind: NetworkKind,
    max_authors: Option<usize>,
    workers: Option<usize>,
) -> Result<()> {
    let store = open_store(config, db_override).await?;
    let entity_kind = match kind {
        NetworkKind::Affiliations => EntityKind::Affiliation,
        NetworkKind::Persons => EntityKind::Person,
    };
    let max_authors = max_authors.unwrap_or(config.defaults.max_authors_per_work);
    let workers = workers.unwrap_or(config.defaults.workers);

    let processed = build_all_networks(&store, entity_kind, max_authors, workers).await?;

    println!();
    println!("  Networks built for {processed} seeds.");
    println!();
    Ok(())
}

async fn cmd_top_words(config: &AppConfig, db_override: Option<&str>) -> Result<()> {
    let store = open_store(config, db_override).await?;
    let lemmatizer = SimpleLemmatizer;

    let affiliations = top_words_for_affiliations(&store, &lemmatizer).await?;
    let persons = top_words_for_persons(&store, &lemmatizer).await?;

    println!();
    println!("  Top words written: {affiliations} affiliations, {persons} persons.");
    println!();
    Ok(())
}

async fn cmd_clean_authors(config: &AppConfig, db_override: Option<&str>) -> Result<()> {
    let store = open_store(config, db_override).await?;
    let cleaned = clean_author_links(&store).await?;

    println!();
    println!("  Author links cleared on {cleaned} works.");
    println!();
    Ok(())
}

async fn cmd_stats(config: &AppConfig, db_override: Option<&str>) -> Result<()> {
    let store = open_store(config, db_override).await?;

    println!();
    for kind in [
        EntityKind::Work,
        EntityKind::Person,
        EntityKind::Affiliation,
        EntityKind::Source,
    ] {
        let count = store.count_entities(kind).await?;
        println!("  {:<14} {count}", kind.collection());
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config file created at {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let path = config_file_path()?;
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Ingestion progress bar using indicatif.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .expect("valid progress template"),
        );
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl IngestProgress for CliProgress {
    fn record_done(&self, current: usize, _total: usize) {
        self.bar.set_position(current as u64);
    }
}
