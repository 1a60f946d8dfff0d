//! Shared types, error model, and configuration for bibgraph.
//!
//! This crate is the foundation depended on by all other bibgraph crates.
//! It provides:
//! - [`BibgraphError`] — the unified error type
//! - The canonical entity model ([`Work`], [`Person`], [`Affiliation`], [`Source`])
//! - Provider feed records ([`ProviderRecord`])
//! - Configuration ([`AppConfig`], thresholds, config loading)
//! - Text normalization and ensemble language detection

pub mod config;
pub mod entities;
pub mod error;
pub mod lang;
pub mod normalize;
pub mod record;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, IngestConfig, MatchThresholds, SimilarityConfig, StoreConfig,
    ThresholdsConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
pub use entities::{
    Affiliation, AffiliationPeriod, AffiliationRef, BibliographicInfo, CitationCount,
    CoauthorshipNetwork, EntityKind, ExternalId, GroupRef, NameEntry, NetworkArtifact,
    NetworkEdge, NetworkNode, Person, Provenance, Publisher, RankEntry, Relation, Source,
    TitleEntry, TopWords, TypeEntry, VenueRef, Work, WorkAuthor, WordCount, YearCount,
    choose_name, new_entity_id, provenanced_by,
};
pub use error::{BibgraphError, Result};
pub use lang::{EnsembleDetector, LanguageDetector};
pub use record::{
    ProviderRecord, RecordAffiliation, RecordAuthor, RecordRelation, RecordTitle, RecordVenue,
};
