//! Identity resolution: decide whether an incoming provider record refers
//! to an entity the canonical store already knows.
//!
//! Resolution is a cascade, first hit wins: external identifiers are
//! authoritative; the similarity index is consulted only for works that
//! carry no matchable identifier; a record with neither identifier nor
//! title is ambiguous and stays unresolved.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use bibgraph_shared::normalize::{best_author_score, names_equal, normalize_title, title_score};
use bibgraph_shared::{
    Affiliation, ExternalId, MatchThresholds, Person, ProviderRecord, RecordAuthor, RecordVenue,
    Result, Source, Work,
};
use bibgraph_similarity::{SimilarityIndex, WorkHit, WorkQuery};
use bibgraph_storage::Store;

/// Composite provider product code: document number (9–11 digits) plus
/// product code (1–7 digits).
static COMPOSITE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{9,11})-(\d{1,7})$").expect("valid composite-id regex"));

/// Split a raw provider id of the form `123456789-0000007` into document
/// number and product code.
pub fn parse_composite_id(raw: &str) -> Option<(String, String)> {
    let caps = COMPOSITE_ID.captures(raw)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Canonical string form of a composite identifier.
pub fn composite_id(document_number: &str, product_code: &str) -> String {
    format!("{document_number}-{product_code}")
}

/// External identifiers of a work record, including the canonicalized
/// composite id parsed out of the raw provider id.
pub fn record_external_ids(record: &ProviderRecord) -> Vec<ExternalId> {
    let mut ids = record.external_ids.clone();
    if let Some(raw) = record.raw_id.as_deref() {
        if let Some((doc_number, product_code)) = parse_composite_id(raw) {
            let composite = composite_id(&doc_number, &product_code);
            if !ids.iter().any(|e| e.id == composite) {
                ids.push(ExternalId {
                    source: "scienti".into(),
                    id: composite,
                });
            }
        }
    }
    ids
}

// ---------------------------------------------------------------------------
// Work resolution
// ---------------------------------------------------------------------------

/// Resolve a work record against the store.
///
/// 1. Strong-key match on any external identifier (authoritative).
/// 2. Similarity fallback over the index, works only, when no identifier
///    matched and a title is present.
/// 3. Otherwise unresolved.
pub async fn resolve_work<S: SimilarityIndex>(
    store: &Store,
    index: Option<&S>,
    record: &ProviderRecord,
    thresholds: MatchThresholds,
    max_hits: usize,
) -> Result<Option<Work>> {
    for ext in record_external_ids(record) {
        if let Some(work) = store.find_work_by_external_id(&ext.id).await? {
            return Ok(Some(work));
        }
    }

    let Some(index) = index else {
        return Ok(None);
    };
    let Some(title) = record.first_title() else {
        // An author alone is ambiguous: never fuzzy-match without a title.
        return Ok(None);
    };

    // Up to one author name goes into the query; prefer the canonical
    // spelling when the mention resolves by identifier.
    let mut author_name = None;
    if let Some(mention) = record.authors.first() {
        let mut name = mention.full_name.clone();
        for ext in &mention.external_ids {
            if let Some(person) = store.find_person_by_external_id(&ext.id).await? {
                name = person.full_name;
                break;
            }
        }
        if !name.trim().is_empty() {
            author_name = Some(name);
        }
    }

    match author_name {
        Some(author) => {
            let query = WorkQuery {
                title: title.to_string(),
                authors: vec![author.clone()],
                max_hits,
                ..Default::default()
            };
            for hit in index.search_works(&query).await? {
                if !accept_candidate(title, &author, &hit, thresholds) {
                    continue;
                }
                match store.get_work(&hit.id).await? {
                    Some(work) => return Ok(Some(work)),
                    None => {
                        warn!(id = %hit.id, "similarity hit not present in store, ignoring");
                    }
                }
            }
        }
        None => {
            // No author: accept only on stored-title similarity alone.
            let query = WorkQuery {
                title: normalize_title(title),
                max_hits,
                ..Default::default()
            };
            for hit in index.search_works(&query).await? {
                let Some(work) = store.get_work(&hit.id).await? else {
                    warn!(id = %hit.id, "similarity hit not present in store, ignoring");
                    continue;
                };
                let best = work
                    .titles
                    .iter()
                    .map(|t| title_score(title, &t.title))
                    .fold(0.0, f64::max);
                if best > thresholds.paper_thd_high {
                    return Ok(Some(work));
                }
            }
        }
    }

    Ok(None)
}

/// Whether a similarity candidate is a confident match for the record.
fn accept_candidate(title: &str, author: &str, hit: &WorkHit, thresholds: MatchThresholds) -> bool {
    let author_found = best_author_score(author, &hit.authors) >= thresholds.author_thd;
    let score = title_score(title, &hit.title);
    score >= thresholds.paper_thd_high || (author_found && score >= thresholds.paper_thd_low)
}

// ---------------------------------------------------------------------------
// Author resolution within a work
// ---------------------------------------------------------------------------

/// Find a person by any of the given external identifiers.
pub async fn resolve_person_by_external_ids(
    store: &Store,
    ids: &[ExternalId],
) -> Result<Option<Person>> {
    for ext in ids {
        if let Some(person) = store.find_person_by_external_id(&ext.id).await? {
            return Ok(Some(person));
        }
    }
    Ok(None)
}

/// Whether an author mention may be attributed to `candidate`.
///
/// Requires normalized full-name equality plus overlap between the
/// candidate's recorded affiliation history and the mention's affiliation
/// ids. A bare name match never merges: common names collide.
pub fn author_matches(
    candidate: &Person,
    mention_name: &str,
    mention_affiliation_ids: &[String],
) -> bool {
    if !names_equal(&candidate.full_name, mention_name) {
        return false;
    }
    let recorded = candidate.affiliation_ids();
    mention_affiliation_ids
        .iter()
        .any(|id| !id.is_empty() && recorded.contains(&id.as_str()))
}

// ---------------------------------------------------------------------------
// Nested lookups (assembler scope; no similarity index)
// ---------------------------------------------------------------------------

/// Resolve an author mention: external id first, then exact normalized
/// full name.
pub async fn resolve_nested_person(
    store: &Store,
    mention: &RecordAuthor,
) -> Result<Option<Person>> {
    if let Some(person) = resolve_person_by_external_ids(store, &mention.external_ids).await? {
        return Ok(Some(person));
    }
    if mention.full_name.trim().is_empty() {
        return Ok(None);
    }
    store.find_person_by_full_name(&mention.full_name).await
}

/// Resolve an affiliation reference: external id first, then exact
/// normalized name.
pub async fn resolve_nested_affiliation(
    store: &Store,
    external_ids: &[ExternalId],
    name: &str,
) -> Result<Option<Affiliation>> {
    for ext in external_ids {
        if let Some(aff) = store.find_affiliation_by_external_id(&ext.id).await? {
            return Ok(Some(aff));
        }
    }
    if name.trim().is_empty() {
        return Ok(None);
    }
    store.find_affiliation_by_name(name).await
}

/// Resolve a venue reference by external id (issn, issn_l, provider id).
pub async fn resolve_nested_source(store: &Store, venue: &RecordVenue) -> Result<Option<Source>> {
    for ext in &venue.external_ids {
        if let Some(source) = store.find_source_by_external_id(&ext.id).await? {
            return Ok(Some(source));
        }
    }
    Ok(None)
}
