//! Application configuration for bibgraph.
//!
//! User config lives at `~/.bibgraph/bibgraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BibgraphError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bibgraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bibgraph";

// ---------------------------------------------------------------------------
// Config structs (matching bibgraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Canonical store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Similarity index settings.
    #[serde(default)]
    pub similarity: SimilarityConfig,

    /// Matching thresholds for the resolution cascade.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Worker pool size for ingestion and post-calculation passes.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum author/affiliation count a work may have to participate in
    /// a co-authorship network.
    #[serde(default = "default_max_authors")]
    pub max_authors_per_work: usize,

    /// Insert records that match nothing in the store (disable to run a
    /// reconcile-only pass).
    #[serde(default = "default_true")]
    pub insert_all: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_authors_per_work: default_max_authors(),
            insert_all: default_true(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_max_authors() -> usize {
    10
}
fn default_true() -> bool {
    true
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the canonical store database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.bibgraph/bibgraph.db".into()
}

/// `[similarity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Base URL of the similarity index service. Absent means the
    /// fallback stage of the resolver is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Maximum candidates to request per query.
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_hits: default_max_hits(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_hits() -> usize {
    20
}
fn default_timeout_secs() -> u64 {
    10
}

/// `[thresholds]` section. Scores are on a 0–100 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    /// Minimum author partial-match score.
    #[serde(default = "default_author_thd")]
    pub author_thd: f64,

    /// Title score accepted when an author also matches.
    #[serde(default = "default_paper_thd_low")]
    pub paper_thd_low: f64,

    /// Title score accepted on its own.
    #[serde(default = "default_paper_thd_high")]
    pub paper_thd_high: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            author_thd: default_author_thd(),
            paper_thd_low: default_paper_thd_low(),
            paper_thd_high: default_paper_thd_high(),
        }
    }
}

fn default_author_thd() -> f64 {
    65.0
}
fn default_paper_thd_low() -> f64 {
    90.0
}
fn default_paper_thd_high() -> f64 {
    95.0
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Matching thresholds handed to the resolver.
#[derive(Debug, Clone, Copy)]
pub struct MatchThresholds {
    pub author_thd: f64,
    pub paper_thd_low: f64,
    pub paper_thd_high: f64,
}

impl From<&AppConfig> for MatchThresholds {
    fn from(config: &AppConfig) -> Self {
        Self {
            author_thd: config.thresholds.author_thd,
            paper_thd_low: config.thresholds.paper_thd_low,
            paper_thd_high: config.thresholds.paper_thd_high,
        }
    }
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Insert unmatched records.
    pub insert_all: bool,
    /// Matching thresholds.
    pub thresholds: MatchThresholds,
}

impl From<&AppConfig> for IngestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.defaults.workers,
            insert_all: config.defaults.insert_all,
            thresholds: MatchThresholds::from(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bibgraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BibgraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bibgraph/bibgraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BibgraphError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BibgraphError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BibgraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BibgraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BibgraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` in a configured path against the user's home.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("author_thd"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.workers, 4);
        assert_eq!(parsed.thresholds.paper_thd_high, 95.0);
    }

    #[test]
    fn thresholds_from_partial_file() {
        let toml_str = r#"
[thresholds]
paper_thd_high = 97.5

[similarity]
base_url = "http://localhost:9200"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.thresholds.paper_thd_high, 97.5);
        assert_eq!(config.thresholds.author_thd, 65.0);
        assert_eq!(
            config.similarity.base_url.as_deref(),
            Some("http://localhost:9200")
        );
    }

    #[test]
    fn ingest_config_from_app_config() {
        let app = AppConfig::default();
        let ingest = IngestConfig::from(&app);
        assert_eq!(ingest.workers, 4);
        assert!(ingest.insert_all);
        assert_eq!(ingest.thresholds.paper_thd_low, 90.0);
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }
}
