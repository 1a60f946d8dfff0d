//! Provider feed records.
//!
//! A [`ProviderRecord`] is one already-mapped record from a provider feed:
//! raw provider fields have been renamed to the canonical field names, but
//! nothing has been resolved against the store yet. Field mapping itself
//! happens upstream in the provider connectors.

use serde::{Deserialize, Serialize};

use crate::entities::{
    BibliographicInfo, CitationCount, EntityKind, ExternalId, NameEntry, Publisher, RankEntry,
    TypeEntry, YearCount,
};
use crate::error::{BibgraphError, Result};

/// A title as supplied by the provider; language may be absent and is then
/// detected at assembly time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordTitle {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// An affiliation reference inside a record: external ids plus the literal
/// provider-supplied name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordAffiliation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
}

/// An author mention inside a work record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordAuthor {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub affiliations: Vec<RecordAffiliation>,
}

/// The publication venue as referenced by a work record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordVenue {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
}

/// A relation reference on an affiliation record (parent institution,
/// member group).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordRelation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub types: Vec<TypeEntry>,
}

/// One already-mapped record from a provider feed. Sections irrelevant to
/// the record's kind stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub kind: EntityKind,

    /// Raw provider identifier; for some providers a composite product
    /// code such as `123456789-0000007`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,

    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    #[serde(default)]
    pub types: Vec<TypeEntry>,

    // --- work section ---
    #[serde(default)]
    pub titles: Vec<RecordTitle>,
    #[serde(default)]
    pub authors: Vec<RecordAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<RecordVenue>,
    #[serde(default)]
    pub bibliographic_info: BibliographicInfo,
    #[serde(default)]
    pub citations_count: Vec<CitationCount>,
    #[serde(default)]
    pub citations_by_year: Vec<YearCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_published: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<i64>,
    /// Provider code of the research group credited on the work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_code: Option<String>,

    // --- person section ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub first_names: Vec<String>,
    #[serde(default)]
    pub last_names: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub affiliations: Vec<RecordAffiliation>,
    #[serde(default)]
    pub ranking: Vec<RankEntry>,

    // --- affiliation / source section ---
    #[serde(default)]
    pub names: Vec<NameEntry>,
    #[serde(default)]
    pub relations: Vec<RecordRelation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
    #[serde(default)]
    pub abbreviations: Vec<String>,
}

impl ProviderRecord {
    /// Title text of the record's first title, if any.
    pub fn first_title(&self) -> Option<&str> {
        self.titles.first().map(|t| t.title.as_str())
    }

    /// Reject records missing the fields required for their kind.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            EntityKind::Work => {
                if self.titles.is_empty() && self.authors.is_empty() {
                    return Err(BibgraphError::malformed(
                        "work record has no title and no authors",
                    ));
                }
            }
            EntityKind::Person => {
                if self.full_name.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(BibgraphError::malformed("person record has no full name"));
                }
            }
            EntityKind::Affiliation | EntityKind::Source => {
                if self.names.is_empty() {
                    return Err(BibgraphError::malformed(format!(
                        "{} record has no name",
                        self.kind
                    )));
                }
            }
        }
        Ok(())
    }
}
