//! Canonical entity model: works, persons, affiliations, publication
//! sources, and the derived network/top-words artifacts.
//!
//! Entities are created once by the assembler, mutated only through
//! additive merges, and never deleted. Every optional field is an explicit
//! `Option` or a defaulted collection. Provenance (`updated`) is
//! append-only with at most one entry per provider source.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new time-sortable entity identifier.
pub fn new_entity_id() -> String {
    Uuid::now_v7().to_string()
}

/// The four canonical entity kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Work,
    Person,
    Affiliation,
    Source,
}

impl EntityKind {
    /// Store collection (table) name for this kind.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Work => "works",
            EntityKind::Person => "persons",
            EntityKind::Affiliation => "affiliations",
            EntityKind::Source => "sources",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

// ---------------------------------------------------------------------------
// Shared sub-records
// ---------------------------------------------------------------------------

/// Provenance entry: which provider touched the entity, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub time: i64,
}

/// An identifier assigned by an external provider (doi, orcid, issn, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalId {
    pub source: String,
    pub id: String,
}

/// A title as reported by one provider, with detected language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleEntry {
    pub title: String,
    pub lang: String,
    pub source: String,
}

/// A display name for a multilingual entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub lang: String,
    pub source: String,
}

/// A type tag (work type, affiliation type, venue type) from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub source: String,
    #[serde(rename = "type")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

/// Citation count as reported by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationCount {
    pub source: String,
    pub count: i64,
}

/// Citations received in a single year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearCount {
    pub year: i32,
    pub cited_by_count: i64,
}

/// A ranking entry (researcher category, work classification).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub source: String,
    pub rank: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
}

/// Check whether a provenance list already carries an entry for `source`.
pub fn provenanced_by(updated: &[Provenance], source: &str) -> bool {
    updated.iter().any(|p| p.source == source)
}

/// Choose a display name with the es → en → first preference.
pub fn choose_name(names: &[NameEntry]) -> Option<&str> {
    let mut chosen = names.first().map(|n| n.name.as_str())?;
    for n in names {
        if n.lang == "es" {
            return Some(&n.name);
        } else if n.lang == "en" {
            chosen = &n.name;
        }
    }
    Some(chosen)
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// Snapshot of an affiliation as attached to an author inside a work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliationRef {
    /// Canonical affiliation id, or the empty sentinel when unresolved.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
}

/// An author entry embedded in a work. Not a standalone entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAuthor {
    /// Canonical person id, or `""` meaning "name known, identity
    /// unresolved".
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub affiliations: Vec<AffiliationRef>,
    /// Role tag (e.g. "advisor" for thesis works).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Reference to the publication venue of a work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRef {
    /// Canonical source id, or `""` when unresolved.
    pub id: String,
    pub name: String,
}

/// Reference to a research group credited on a work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    pub name: String,
}

/// Volume/issue/pages/open-access data for a work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BibliographicInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_open_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_access_status: Option<String>,
}

/// A research work (article, thesis, book chapter, …).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub id: String,
    #[serde(default)]
    pub titles: Vec<TitleEntry>,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
    #[serde(default)]
    pub authors: Vec<WorkAuthor>,
    #[serde(default)]
    pub author_count: usize,
    #[serde(default)]
    pub bibliographic_info: BibliographicInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VenueRef>,
    #[serde(default)]
    pub citations_count: Vec<CitationCount>,
    #[serde(default)]
    pub citations_by_year: Vec<YearCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_published: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<i64>,
    #[serde(default)]
    pub ranking: Vec<RankEntry>,
    #[serde(default)]
    pub groups: Vec<GroupRef>,
    #[serde(default)]
    pub updated: Vec<Provenance>,
}

impl Work {
    /// Empty work template with a fresh id.
    pub fn template() -> Self {
        Self {
            id: new_entity_id(),
            ..Default::default()
        }
    }

    /// Whether this work was already touched by `source`.
    pub fn provenanced_by(&self, source: &str) -> bool {
        provenanced_by(&self.updated, source)
    }

    /// First title, if any (the display title).
    pub fn display_title(&self) -> Option<&TitleEntry> {
        self.titles.first()
    }
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

/// An affiliation period in a person's history. `-1` bounds mean unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliationPeriod {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
    #[serde(default = "unknown_epoch")]
    pub start_date: i64,
    #[serde(default = "unknown_epoch")]
    pub end_date: i64,
}

fn unknown_epoch() -> i64 {
    -1
}

/// A researcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub first_names: Vec<String>,
    #[serde(default)]
    pub last_names: Vec<String>,
    #[serde(default)]
    pub initials: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub affiliations: Vec<AffiliationPeriod>,
    #[serde(default)]
    pub ranking: Vec<RankEntry>,
    #[serde(default)]
    pub updated: Vec<Provenance>,
}

impl Person {
    /// Empty person template with a fresh id.
    pub fn template() -> Self {
        Self {
            id: new_entity_id(),
            ..Default::default()
        }
    }

    /// Whether this person was already touched by `source`.
    pub fn provenanced_by(&self, source: &str) -> bool {
        provenanced_by(&self.updated, source)
    }

    /// Ids of every affiliation in this person's history.
    pub fn affiliation_ids(&self) -> Vec<&str> {
        self.affiliations.iter().map(|a| a.id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Affiliation
// ---------------------------------------------------------------------------

/// An institutional relation (parent faculty, member group, …) with a
/// denormalized snapshot of the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
}

/// An institution, faculty, department, or research group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Affiliation {
    pub id: String,
    #[serde(default)]
    pub names: Vec<NameEntry>,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub updated: Vec<Provenance>,
}

impl Affiliation {
    /// Empty affiliation template with a fresh id.
    pub fn template() -> Self {
        Self {
            id: new_entity_id(),
            ..Default::default()
        }
    }

    /// Whether this affiliation was already touched by `source`.
    pub fn provenanced_by(&self, source: &str) -> bool {
        provenanced_by(&self.updated, source)
    }

    /// Display name with the es → en → first preference.
    pub fn display_name(&self) -> &str {
        choose_name(&self.names).unwrap_or("")
    }

    /// Whether any type tag matches one of `wanted` (case-insensitive).
    pub fn has_type_in(&self, wanted: &[&str]) -> bool {
        self.types
            .iter()
            .any(|t| wanted.iter().any(|w| t.value.eq_ignore_ascii_case(w)))
    }
}

// ---------------------------------------------------------------------------
// Source (publication venue)
// ---------------------------------------------------------------------------

/// Publisher of a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub name: String,
    #[serde(default)]
    pub country_code: String,
}

/// A publication venue (journal, conference, repository).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub names: Vec<NameEntry>,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
    #[serde(default)]
    pub abbreviations: Vec<String>,
    #[serde(default)]
    pub updated: Vec<Provenance>,
}

impl Source {
    /// Empty source template with a fresh id.
    pub fn template() -> Self {
        Self {
            id: new_entity_id(),
            ..Default::default()
        }
    }

    /// Whether this source was already touched by `source_name`.
    pub fn provenanced_by(&self, source_name: &str) -> bool {
        provenanced_by(&self.updated, source_name)
    }

    /// Display name with the es → en → first preference.
    pub fn display_name(&self) -> &str {
        choose_name(&self.names).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Derived artifacts
// ---------------------------------------------------------------------------

/// A node in a co-authorship network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: String,
    pub label: String,
    pub degree: usize,
    pub size: f64,
}

/// An edge in a co-authorship network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub source: String,
    #[serde(rename = "sourceName")]
    pub source_name: String,
    pub target: String,
    #[serde(rename = "targetName")]
    pub target_name: String,
    pub coauthorships: u64,
    pub size: f64,
}

/// The sized co-authorship graph for one seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoauthorshipNetwork {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

/// The persisted network artifact. Written at most once per seed id;
/// presence in the store is the completion marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkArtifact {
    #[serde(rename = "_id")]
    pub id: String,
    pub coauthorship_network: CoauthorshipNetwork,
}

/// One entry of a top-words summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCount {
    pub name: String,
    pub value: u64,
}

/// The persisted top-words artifact for an affiliation or person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopWords {
    #[serde(rename = "_id")]
    pub id: String,
    pub top_words: Vec<WordCount>,
}
