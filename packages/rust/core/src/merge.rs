//! Additive merge of provider records into existing canonical entities.
//!
//! Every merge is guarded by provenance: a provider may update a given
//! entity at most once per ingestion pass, so re-running a feed is a
//! no-op. Merges only ever append — union by identity key for flat lists,
//! id-deduplicated appends for histories and author snapshots. The outcome
//! carries the list of touched fields so the caller can persist a partial
//! update instead of replacing the document.

use tracing::debug;

use bibgraph_shared::lang::EnsembleDetector;
use bibgraph_shared::{
    Affiliation, AffiliationPeriod, AffiliationRef, EntityKind, Person, Provenance,
    ProviderRecord, Result, Source, TitleEntry, Work, WorkAuthor,
};
use bibgraph_storage::Store;

use crate::resolve::{
    author_matches, record_external_ids, resolve_nested_affiliation, resolve_person_by_external_ids,
};

/// Work types that mark a thesis; their resolved author gets the advisor
/// role.
pub const THESIS_TYPES: &[&str] = &[
    "Tesis de pregrado",
    "Tesis de maestria",
    "Tesis de doctorado",
];

/// Outcome of a merge: either a provenance-guarded no-op, or the updated
/// entity plus the names of the fields that changed.
#[derive(Debug)]
pub enum MergeOutcome<T> {
    /// The source already touched this entity; nothing was changed.
    Skip,
    /// Fields in `touched` were modified on `entity`.
    Updated {
        entity: T,
        touched: Vec<&'static str>,
    },
}

impl<T> MergeOutcome<T> {
    /// Whether the merge was a no-op.
    pub fn is_skip(&self) -> bool {
        matches!(self, MergeOutcome::Skip)
    }
}

// ---------------------------------------------------------------------------
// Work merge
// ---------------------------------------------------------------------------

/// Merge a work record into an existing canonical work.
pub async fn merge_work(
    store: &Store,
    mut work: Work,
    record: &ProviderRecord,
    source: &str,
    detector: &EnsembleDetector,
    now: i64,
) -> Result<MergeOutcome<Work>> {
    if work.provenanced_by(source) {
        debug!(work = %work.id, source, "already provenanced, skipping");
        return Ok(MergeOutcome::Skip);
    }

    let mut touched: Vec<&'static str> = vec!["updated"];
    work.updated.push(Provenance {
        source: source.into(),
        time: now,
    });

    // Titles: at most one per source.
    if let Some(title) = record.titles.first() {
        if !work.titles.iter().any(|t| t.source == source) {
            let lang = title
                .lang
                .clone()
                .or_else(|| detector.detect(&title.title))
                .unwrap_or_default();
            work.titles.push(TitleEntry {
                title: title.title.clone(),
                lang,
                source: source.into(),
            });
            touched.push("titles");
        }
    }

    // External identifiers: union by id.
    for ext in record_external_ids(record) {
        if !work.external_ids.iter().any(|e| e.id == ext.id) {
            work.external_ids.push(ext);
            if !touched.contains(&"external_ids") {
                touched.push("external_ids");
            }
        }
    }

    // Types: union by source.
    for typ in &record.types {
        if !work.types.iter().any(|t| t.source == typ.source) {
            work.types.push(typ.clone());
            if !touched.contains(&"types") {
                touched.push("types");
            }
        }
    }

    // Open-access flags: fill only when absent.
    let bib = &mut work.bibliographic_info;
    let incoming = &record.bibliographic_info;
    if bib.is_open_access.is_none() && incoming.is_open_access.is_some() {
        bib.is_open_access = incoming.is_open_access;
        touched.push("bibliographic_info");
    }
    if bib.open_access_status.is_none() && incoming.open_access_status.is_some() {
        bib.open_access_status = incoming.open_access_status.clone();
        if !touched.contains(&"bibliographic_info") {
            touched.push("bibliographic_info");
        }
    }

    // Citation counts: union by source; per-year counts replaced wholesale.
    for count in &record.citations_count {
        if !work.citations_count.iter().any(|c| c.source == count.source) {
            work.citations_count.push(count.clone());
            if !touched.contains(&"citations_count") {
                touched.push("citations_count");
            }
        }
    }
    if !record.citations_by_year.is_empty() {
        work.citations_by_year = record.citations_by_year.clone();
        touched.push("citations_by_year");
    }

    // Ranking: append only new (rank, date) tuples.
    for rank in &record.ranking {
        if !work
            .ranking
            .iter()
            .any(|r| r.rank == rank.rank && r.date == rank.date)
        {
            work.ranking.push(rank.clone());
            if !touched.contains(&"ranking") {
                touched.push("ranking");
            }
        }
    }

    // Research group credited on the work.
    let group = match record.group_code.as_deref() {
        Some(code) => lookup_group(store, code).await?,
        None => None,
    };
    if let Some(group) = &group {
        if !work.groups.iter().any(|g| g.id == group.id) {
            work.groups.push(bibgraph_shared::GroupRef {
                id: group.id.clone(),
                name: group.display_name().to_string(),
            });
            touched.push("groups");
        }
    }

    // Author list.
    if merge_authors(store, &mut work, record, group.as_ref()).await? {
        touched.push("authors");
    }

    Ok(MergeOutcome::Updated {
        entity: work,
        touched,
    })
}

/// Resolve a provider group code, preferring the curated provider's codes.
async fn lookup_group(store: &Store, code: &str) -> Result<Option<Affiliation>> {
    if let Some(id) = store
        .find_id_by_source_external_id(EntityKind::Affiliation, "scienti", code)
        .await?
    {
        return store.get_affiliation(&id).await;
    }
    store.find_affiliation_by_external_id(code).await
}

/// Merge the record's author mention into the work's author list.
/// Returns true when the list changed.
async fn merge_authors(
    store: &Store,
    work: &mut Work,
    record: &ProviderRecord,
    group: Option<&Affiliation>,
) -> Result<bool> {
    let Some(mention) = record.authors.first() else {
        return Ok(false);
    };
    if mention.external_ids.is_empty() {
        return Ok(false);
    }
    let Some(person) = resolve_person_by_external_ids(store, &mention.external_ids).await? else {
        debug!("no person in store for author mention identifiers");
        return Ok(false);
    };

    // The mention's affiliation snapshot, resolved against the store.
    let snapshot = match mention.affiliations.first() {
        Some(aff) => resolve_nested_affiliation(store, &aff.external_ids, &aff.name)
            .await?
            .map(|a| AffiliationRef {
                id: a.id.clone(),
                name: a.display_name().trim().to_string(),
                types: a.types.clone(),
            }),
        None => None,
    };

    let mut changed = false;

    let position = match work.authors.iter().position(|a| a.id == person.id) {
        Some(position) => Some(position),
        None => {
            // Narrow rule: normalized name equality plus affiliation
            // overlap against the person's recorded history.
            let mut matched = None;
            for (i, author) in work.authors.iter_mut().enumerate() {
                if author.id.is_empty() {
                    continue;
                }
                let aff_ids: Vec<String> =
                    author.affiliations.iter().map(|a| a.id.clone()).collect();
                if author_matches(&person, &author.full_name, &aff_ids) {
                    author.id = person.id.clone();
                    author.full_name = person.full_name.clone();
                    matched = Some(i);
                    changed = true;
                    break;
                }
            }
            matched
        }
    };

    let index = match position {
        Some(index) => index,
        None => {
            // New to this work: append.
            work.authors.push(WorkAuthor {
                id: person.id.clone(),
                full_name: person.full_name.clone(),
                affiliations: Vec::new(),
                role: None,
            });
            changed = true;
            work.authors.len() - 1
        }
    };

    if let Some(snapshot) = snapshot {
        let author = &mut work.authors[index];
        if !author.affiliations.iter().any(|a| a.id == snapshot.id) {
            author.affiliations.push(snapshot);
            changed = true;
        }
    }

    // Thesis works mark their resolved author as advisor.
    if is_thesis(record) && work.authors[index].role.as_deref() != Some("advisor") {
        work.authors[index].role = Some("advisor".into());
        changed = true;
    }

    // Propagate the group's "education" relations onto the author, then
    // the organizational units that hang off the same institution.
    if let Some(group) = group {
        if propagate_education_relations(&mut work.authors[index], group) {
            changed = true;
        }
        let units =
            organizational_units(store, &person, &work.authors[index].affiliations).await?;
        let author = &mut work.authors[index];
        for unit in units {
            if !author.affiliations.iter().any(|a| a.id == unit.id) {
                author.affiliations.push(unit);
                changed = true;
            }
        }
    }

    Ok(changed)
}

/// Whether the record is tagged as a thesis (level-1 type).
pub fn is_thesis(record: &ProviderRecord) -> bool {
    record
        .types
        .iter()
        .any(|t| t.level == Some(1) && THESIS_TYPES.contains(&t.value.as_str()))
}

/// Append the group's education-tagged institutional relations to the
/// author's affiliation snapshots. Returns true when anything changed.
pub fn propagate_education_relations(author: &mut WorkAuthor, group: &Affiliation) -> bool {
    let mut changed = false;
    for relation in &group.relations {
        let education = relation
            .types
            .iter()
            .any(|t| t.value.eq_ignore_ascii_case("education"));
        if !education {
            continue;
        }
        if !author.affiliations.iter().any(|a| a.id == relation.id) {
            author.affiliations.push(AffiliationRef {
                id: relation.id.clone(),
                name: relation.name.clone(),
                types: relation.types.clone(),
            });
            changed = true;
        }
    }
    changed
}

/// Faculties and departments of the author's institution, taken from the
/// person's recorded history.
///
/// The institution is the first snapshot affiliation that is not itself an
/// organizational unit and appears in the person's history; units are the
/// person's faculty/department affiliations related to that institution.
pub async fn organizational_units(
    store: &Store,
    person: &Person,
    snapshots: &[AffiliationRef],
) -> Result<Vec<AffiliationRef>> {
    let mut institution_id = None;
    for aff in snapshots {
        if aff.id.is_empty() {
            continue;
        }
        let Some(aff_db) = store.get_affiliation(&aff.id).await? else {
            continue;
        };
        if aff_db.has_type_in(&["group", "department", "faculty"]) {
            continue;
        }
        if store.person_has_affiliation(&person.id, &aff_db.id).await? {
            institution_id = Some(aff_db.id);
            break;
        }
    }
    let Some(institution_id) = institution_id else {
        return Ok(Vec::new());
    };

    let mut units = Vec::new();
    for aff in &person.affiliations {
        if aff.id == institution_id || aff.id.is_empty() {
            continue;
        }
        if !store
            .affiliation_has_relation(&aff.id, &institution_id)
            .await?
        {
            continue;
        }
        let unit = aff
            .types
            .iter()
            .any(|t| t.value.eq_ignore_ascii_case("department") || t.value.eq_ignore_ascii_case("faculty"));
        if unit {
            units.push(AffiliationRef {
                id: aff.id.clone(),
                name: aff.name.clone(),
                types: aff.types.clone(),
            });
        }
    }
    Ok(units)
}

// ---------------------------------------------------------------------------
// Person merge
// ---------------------------------------------------------------------------

/// Merge a person record into an existing canonical person.
pub async fn merge_person(
    store: &Store,
    mut person: Person,
    record: &ProviderRecord,
    source: &str,
    now: i64,
) -> Result<MergeOutcome<Person>> {
    if person.provenanced_by(source) {
        return Ok(MergeOutcome::Skip);
    }

    let mut touched: Vec<&'static str> = vec!["updated"];
    person.updated.push(Provenance {
        source: source.into(),
        time: now,
    });

    for ext in &record.external_ids {
        if !person.external_ids.iter().any(|e| e.id == ext.id) {
            person.external_ids.push(ext.clone());
            if !touched.contains(&"external_ids") {
                touched.push("external_ids");
            }
        }
    }

    for alias in &record.aliases {
        let alias = alias.to_lowercase();
        if !person.aliases.contains(&alias) {
            person.aliases.push(alias);
            if !touched.contains(&"aliases") {
                touched.push("aliases");
            }
        }
    }

    // Affiliation history: append only unseen target ids.
    for aff in &record.affiliations {
        let Some(resolved) = resolve_nested_affiliation(store, &aff.external_ids, &aff.name).await?
        else {
            continue;
        };
        if person.affiliations.iter().any(|a| a.id == resolved.id) {
            continue;
        }
        person.affiliations.push(AffiliationPeriod {
            id: resolved.id.clone(),
            name: resolved.display_name().to_string(),
            types: resolved.types.clone(),
            start_date: aff.start_date.unwrap_or(-1),
            end_date: aff.end_date.unwrap_or(-1),
        });
        if !touched.contains(&"affiliations") {
            touched.push("affiliations");
        }
    }

    // Ranking: append only new (rank, date) tuples.
    for rank in &record.ranking {
        if !person
            .ranking
            .iter()
            .any(|r| r.rank == rank.rank && r.date == rank.date)
        {
            person.ranking.push(rank.clone());
            if !touched.contains(&"ranking") {
                touched.push("ranking");
            }
        }
    }

    Ok(MergeOutcome::Updated {
        entity: person,
        touched,
    })
}

// ---------------------------------------------------------------------------
// Affiliation merge
// ---------------------------------------------------------------------------

/// Merge an affiliation record into an existing canonical affiliation.
pub async fn merge_affiliation(
    store: &Store,
    mut aff: Affiliation,
    record: &ProviderRecord,
    source: &str,
    now: i64,
) -> Result<MergeOutcome<Affiliation>> {
    if aff.provenanced_by(source) {
        return Ok(MergeOutcome::Skip);
    }

    let mut touched: Vec<&'static str> = vec!["updated"];
    aff.updated.push(Provenance {
        source: source.into(),
        time: now,
    });

    for name in &record.names {
        if !aff.names.iter().any(|n| n.name == name.name) {
            aff.names.push(name.clone());
            if !touched.contains(&"names") {
                touched.push("names");
            }
        }
    }
    for ext in &record.external_ids {
        if !aff.external_ids.iter().any(|e| e.id == ext.id) {
            aff.external_ids.push(ext.clone());
            if !touched.contains(&"external_ids") {
                touched.push("external_ids");
            }
        }
    }
    for typ in &record.types {
        if !aff.types.iter().any(|t| t.source == typ.source) {
            aff.types.push(typ.clone());
            if !touched.contains(&"types") {
                touched.push("types");
            }
        }
    }

    // Relations: append only unseen target ids.
    for relation in &record.relations {
        let Some(target) =
            resolve_nested_affiliation(store, &relation.external_ids, &relation.name).await?
        else {
            continue;
        };
        if aff.relations.iter().any(|r| r.id == target.id) {
            continue;
        }
        aff.relations.push(bibgraph_shared::Relation {
            id: target.id.clone(),
            name: target.display_name().to_string(),
            types: target.types.clone(),
        });
        if !touched.contains(&"relations") {
            touched.push("relations");
        }
    }

    Ok(MergeOutcome::Updated {
        entity: aff,
        touched,
    })
}

// ---------------------------------------------------------------------------
// Source merge
// ---------------------------------------------------------------------------

/// Merge a venue record into an existing canonical source.
pub fn merge_source(
    mut venue: Source,
    record: &ProviderRecord,
    source: &str,
    now: i64,
) -> MergeOutcome<Source> {
    if venue.provenanced_by(source) {
        return MergeOutcome::Skip;
    }

    let mut touched: Vec<&'static str> = vec!["updated"];
    venue.updated.push(Provenance {
        source: source.into(),
        time: now,
    });

    for name in &record.names {
        if !venue.names.iter().any(|n| n.name == name.name) {
            venue.names.push(name.clone());
            if !touched.contains(&"names") {
                touched.push("names");
            }
        }
    }
    for ext in &record.external_ids {
        if !venue.external_ids.iter().any(|e| e.id == ext.id) {
            venue.external_ids.push(ext.clone());
            if !touched.contains(&"external_ids") {
                touched.push("external_ids");
            }
        }
    }
    for typ in &record.types {
        if !venue.types.iter().any(|t| t.source == typ.source) {
            venue.types.push(typ.clone());
            if !touched.contains(&"types") {
                touched.push("types");
            }
        }
    }
    for abbr in &record.abbreviations {
        if !venue.abbreviations.contains(abbr) {
            venue.abbreviations.push(abbr.clone());
            if !touched.contains(&"abbreviations") {
                touched.push("abbreviations");
            }
        }
    }

    MergeOutcome::Updated {
        entity: venue,
        touched,
    }
}

// ---------------------------------------------------------------------------
// Partial-update payloads
// ---------------------------------------------------------------------------

/// Serialize the touched fields of a merged work for a partial update.
pub fn work_fields(work: &Work, touched: &[&'static str]) -> Vec<(&'static str, serde_json::Value)> {
    touched
        .iter()
        .filter_map(|&field| {
            let value = match field {
                "updated" => serde_json::to_value(&work.updated),
                "titles" => serde_json::to_value(&work.titles),
                "external_ids" => serde_json::to_value(&work.external_ids),
                "types" => serde_json::to_value(&work.types),
                "authors" => serde_json::to_value(&work.authors),
                "bibliographic_info" => serde_json::to_value(&work.bibliographic_info),
                "citations_count" => serde_json::to_value(&work.citations_count),
                "citations_by_year" => serde_json::to_value(&work.citations_by_year),
                "ranking" => serde_json::to_value(&work.ranking),
                "groups" => serde_json::to_value(&work.groups),
                _ => return None,
            };
            value.ok().map(|v| (field, v))
        })
        .collect()
}

/// Serialize the touched fields of a merged person for a partial update.
pub fn person_fields(
    person: &Person,
    touched: &[&'static str],
) -> Vec<(&'static str, serde_json::Value)> {
    touched
        .iter()
        .filter_map(|&field| {
            let value = match field {
                "updated" => serde_json::to_value(&person.updated),
                "external_ids" => serde_json::to_value(&person.external_ids),
                "aliases" => serde_json::to_value(&person.aliases),
                "affiliations" => serde_json::to_value(&person.affiliations),
                "ranking" => serde_json::to_value(&person.ranking),
                _ => return None,
            };
            value.ok().map(|v| (field, v))
        })
        .collect()
}

/// Serialize the touched fields of a merged affiliation for a partial update.
pub fn affiliation_fields(
    aff: &Affiliation,
    touched: &[&'static str],
) -> Vec<(&'static str, serde_json::Value)> {
    touched
        .iter()
        .filter_map(|&field| {
            let value = match field {
                "updated" => serde_json::to_value(&aff.updated),
                "names" => serde_json::to_value(&aff.names),
                "external_ids" => serde_json::to_value(&aff.external_ids),
                "types" => serde_json::to_value(&aff.types),
                "relations" => serde_json::to_value(&aff.relations),
                _ => return None,
            };
            value.ok().map(|v| (field, v))
        })
        .collect()
}

/// Serialize the touched fields of a merged source for a partial update.
pub fn source_fields(
    venue: &Source,
    touched: &[&'static str],
) -> Vec<(&'static str, serde_json::Value)> {
    touched
        .iter()
        .filter_map(|&field| {
            let value = match field {
                "updated" => serde_json::to_value(&venue.updated),
                "names" => serde_json::to_value(&venue.names),
                "external_ids" => serde_json::to_value(&venue.external_ids),
                "types" => serde_json::to_value(&venue.types),
                "abbreviations" => serde_json::to_value(&venue.abbreviations),
                _ => return None,
            };
            value.ok().map(|v| (field, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibgraph_shared::{
        EntityKind, ExternalId, NameEntry, RankEntry, RecordAffiliation, RecordAuthor,
        RecordTitle, TypeEntry,
    };
    use uuid::Uuid;

    async fn test_store() -> Store {
        let tmp = std::env::temp_dir().join(format!("bibgraph_merge_{}.db", Uuid::now_v7()));
        Store::open(&tmp).await.expect("open test store")
    }

    fn detector() -> EnsembleDetector {
        EnsembleDetector::default_stack()
    }

    fn existing_work() -> Work {
        let mut work = Work::template();
        work.titles.push(TitleEntry {
            title: "Estudio de redes".into(),
            lang: "es".into(),
            source: "openalex".into(),
        });
        work.external_ids.push(ExternalId {
            source: "doi".into(),
            id: "10.1/w".into(),
        });
        work.types.push(TypeEntry {
            source: "openalex".into(),
            value: "article".into(),
            level: None,
        });
        work.updated.push(Provenance {
            source: "openalex".into(),
            time: 1_600_000_000,
        });
        work
    }

    fn incoming_record() -> ProviderRecord {
        ProviderRecord {
            kind: EntityKind::Work,
            titles: vec![RecordTitle {
                title: "Estudio de redes de coautoría".into(),
                lang: Some("es".into()),
            }],
            external_ids: vec![
                ExternalId {
                    source: "doi".into(),
                    id: "10.1/w".into(),
                },
                ExternalId {
                    source: "scienti".into(),
                    id: "123456789-0000001".into(),
                },
            ],
            types: vec![TypeEntry {
                source: "scienti".into(),
                value: "Artículo de revista".into(),
                level: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn provenance_guard_skips_repeat_source() {
        let store = test_store().await;
        let work = existing_work();
        let record = incoming_record();

        let outcome = merge_work(&store, work, &record, "openalex", &detector(), 1_700_000_000)
            .await
            .expect("merge");
        assert!(outcome.is_skip());
    }

    #[tokio::test]
    async fn merge_is_additive_superset() {
        let store = test_store().await;
        let work = existing_work();
        let before = work.clone();
        let record = incoming_record();

        let outcome = merge_work(&store, work, &record, "scienti", &detector(), 1_700_000_000)
            .await
            .expect("merge");
        let MergeOutcome::Updated { entity, touched } = outcome else {
            panic!("expected update");
        };

        // Union fields are supersets of both inputs.
        for ext in &before.external_ids {
            assert!(entity.external_ids.iter().any(|e| e.id == ext.id));
        }
        for ext in &record.external_ids {
            assert!(entity.external_ids.iter().any(|e| e.id == ext.id));
        }
        for typ in &before.types {
            assert!(entity.types.iter().any(|t| t.source == typ.source));
        }
        assert!(entity.types.iter().any(|t| t.source == "scienti"));
        assert_eq!(entity.titles.len(), 2);
        assert!(entity.provenanced_by("scienti"));
        assert!(entity.provenanced_by("openalex"));

        assert!(touched.contains(&"updated"));
        assert!(touched.contains(&"titles"));
        assert!(touched.contains(&"external_ids"));
        assert!(touched.contains(&"types"));
        // Authors never touched: the record carried none.
        assert!(!touched.contains(&"authors"));
    }

    #[tokio::test]
    async fn duplicate_entries_are_not_appended() {
        let store = test_store().await;
        let mut work = existing_work();
        work.ranking.push(RankEntry {
            source: "scienti".into(),
            rank: "A1".into(),
            date: Some(1_500_000_000),
        });
        let mut record = incoming_record();
        record.external_ids = vec![ExternalId {
            source: "doi".into(),
            id: "10.1/w".into(),
        }];
        record.ranking = vec![RankEntry {
            source: "scienti".into(),
            rank: "A1".into(),
            date: Some(1_500_000_000),
        }];

        let MergeOutcome::Updated { entity, touched } =
            merge_work(&store, work, &record, "scienti", &detector(), 1_700_000_000)
                .await
                .expect("merge")
        else {
            panic!("expected update");
        };
        assert_eq!(entity.external_ids.len(), 1);
        assert_eq!(entity.ranking.len(), 1);
        assert!(!touched.contains(&"external_ids"));
        assert!(!touched.contains(&"ranking"));
    }

    #[tokio::test]
    async fn known_author_gains_new_affiliation_snapshot() {
        let store = test_store().await;

        let mut group = Affiliation::template();
        group.names.push(NameEntry {
            name: "Grupo de Física".into(),
            lang: "es".into(),
            source: "scienti".into(),
        });
        group.external_ids.push(ExternalId {
            source: "scienti".into(),
            id: "GR-1".into(),
        });
        store.insert_affiliation(&group).await.unwrap();

        let mut person = Person::template();
        person.full_name = "Ana Pérez".into();
        person.external_ids.push(ExternalId {
            source: "scienti".into(),
            id: "RH-1".into(),
        });
        store.insert_person(&person).await.unwrap();

        let mut work = existing_work();
        work.authors.push(WorkAuthor {
            id: person.id.clone(),
            full_name: "Ana Pérez".into(),
            affiliations: vec![],
            role: None,
        });

        let mut record = incoming_record();
        record.authors = vec![RecordAuthor {
            full_name: "Ana Pérez".into(),
            external_ids: vec![ExternalId {
                source: "scienti".into(),
                id: "RH-1".into(),
            }],
            affiliations: vec![RecordAffiliation {
                name: "Grupo de Física".into(),
                external_ids: vec![ExternalId {
                    source: "scienti".into(),
                    id: "GR-1".into(),
                }],
                start_date: None,
                end_date: None,
            }],
        }];

        let MergeOutcome::Updated { entity, touched } =
            merge_work(&store, work, &record, "scienti", &detector(), 1_700_000_000)
                .await
                .expect("merge")
        else {
            panic!("expected update");
        };

        assert!(touched.contains(&"authors"));
        let author = &entity.authors[0];
        assert_eq!(author.affiliations.len(), 1);
        assert_eq!(author.affiliations[0].id, group.id);

        // Re-merging from another source does not duplicate the snapshot.
        let MergeOutcome::Updated { entity, .. } = merge_work(
            &store,
            entity,
            &record,
            "minciencias",
            &detector(),
            1_700_000_100,
        )
        .await
        .expect("second merge") else {
            panic!("expected update");
        };
        assert_eq!(entity.authors[0].affiliations.len(), 1);
    }

    #[tokio::test]
    async fn unknown_author_appends_and_thesis_marks_advisor() {
        let store = test_store().await;

        let mut person = Person::template();
        person.full_name = "Carlos Ruiz".into();
        person.external_ids.push(ExternalId {
            source: "scienti".into(),
            id: "RH-2".into(),
        });
        store.insert_person(&person).await.unwrap();

        let work = existing_work();
        let mut record = incoming_record();
        record.types.push(TypeEntry {
            source: "scienti".into(),
            value: "Tesis de doctorado".into(),
            level: Some(1),
        });
        record.authors = vec![RecordAuthor {
            full_name: "Carlos Ruiz".into(),
            external_ids: vec![ExternalId {
                source: "scienti".into(),
                id: "RH-2".into(),
            }],
            affiliations: vec![],
        }];

        let MergeOutcome::Updated { entity, .. } =
            merge_work(&store, work, &record, "scienti", &detector(), 1_700_000_000)
                .await
                .expect("merge")
        else {
            panic!("expected update");
        };

        let author = entity
            .authors
            .iter()
            .find(|a| a.id == person.id)
            .expect("author appended");
        assert_eq!(author.role.as_deref(), Some("advisor"));
    }

    #[tokio::test]
    async fn education_relations_and_units_propagate() {
        let store = test_store().await;

        // Institution, faculty related to it, and a group related to the
        // institution via an education-tagged relation.
        let mut inst = Affiliation::template();
        inst.names.push(NameEntry {
            name: "Universidad de Antioquia".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        store.insert_affiliation(&inst).await.unwrap();

        let mut faculty = Affiliation::template();
        faculty.names.push(NameEntry {
            name: "Facultad de Ciencias".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        faculty.types.push(TypeEntry {
            source: "staff".into(),
            value: "faculty".into(),
            level: None,
        });
        faculty.relations.push(bibgraph_shared::Relation {
            id: inst.id.clone(),
            name: "Universidad de Antioquia".into(),
            types: vec![],
        });
        store.insert_affiliation(&faculty).await.unwrap();

        let mut group = Affiliation::template();
        group.names.push(NameEntry {
            name: "Grupo de Redes".into(),
            lang: "es".into(),
            source: "scienti".into(),
        });
        group.external_ids.push(ExternalId {
            source: "scienti".into(),
            id: "GR-9".into(),
        });
        group.relations.push(bibgraph_shared::Relation {
            id: inst.id.clone(),
            name: "Universidad de Antioquia".into(),
            types: vec![TypeEntry {
                source: "staff".into(),
                value: "Education".into(),
                level: None,
            }],
        });
        store.insert_affiliation(&group).await.unwrap();

        let mut person = Person::template();
        person.full_name = "Ana Pérez".into();
        person.external_ids.push(ExternalId {
            source: "scienti".into(),
            id: "RH-3".into(),
        });
        person.affiliations.push(AffiliationPeriod {
            id: inst.id.clone(),
            name: "Universidad de Antioquia".into(),
            types: vec![],
            start_date: -1,
            end_date: -1,
        });
        person.affiliations.push(AffiliationPeriod {
            id: faculty.id.clone(),
            name: "Facultad de Ciencias".into(),
            types: vec![TypeEntry {
                source: "staff".into(),
                value: "faculty".into(),
                level: None,
            }],
            start_date: -1,
            end_date: -1,
        });
        store.insert_person(&person).await.unwrap();

        let work = existing_work();
        let mut record = incoming_record();
        record.group_code = Some("GR-9".into());
        record.authors = vec![RecordAuthor {
            full_name: "Ana Pérez".into(),
            external_ids: vec![ExternalId {
                source: "scienti".into(),
                id: "RH-3".into(),
            }],
            affiliations: vec![RecordAffiliation {
                name: "Universidad de Antioquia".into(),
                external_ids: vec![],
                start_date: None,
                end_date: None,
            }],
        }];

        let MergeOutcome::Updated { entity, .. } =
            merge_work(&store, work, &record, "scienti", &detector(), 1_700_000_000)
                .await
                .expect("merge")
        else {
            panic!("expected update");
        };

        let author = entity
            .authors
            .iter()
            .find(|a| a.id == person.id)
            .expect("author");
        let aff_ids: Vec<&str> = author.affiliations.iter().map(|a| a.id.as_str()).collect();
        // Institution snapshot + education relation + faculty unit.
        assert!(aff_ids.contains(&inst.id.as_str()));
        assert!(aff_ids.contains(&faculty.id.as_str()));
        // Group membership record also credits the work's group list.
        assert!(entity.groups.iter().any(|g| g.id == group.id));
    }

    #[tokio::test]
    async fn person_merge_appends_history_without_duplicates() {
        let store = test_store().await;
        let mut inst = Affiliation::template();
        inst.names.push(NameEntry {
            name: "Instituto X".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        inst.external_ids.push(ExternalId {
            source: "ror".into(),
            id: "ror-x".into(),
        });
        store.insert_affiliation(&inst).await.unwrap();

        let mut person = Person::template();
        person.full_name = "Ana Pérez".into();
        person.updated.push(Provenance {
            source: "openalex".into(),
            time: 1_600_000_000,
        });

        let record = ProviderRecord {
            kind: EntityKind::Person,
            full_name: Some("Ana Pérez".into()),
            external_ids: vec![ExternalId {
                source: "orcid".into(),
                id: "0000-0001".into(),
            }],
            affiliations: vec![RecordAffiliation {
                name: "Instituto X".into(),
                external_ids: vec![ExternalId {
                    source: "ror".into(),
                    id: "ror-x".into(),
                }],
                start_date: Some(1_500_000_000),
                end_date: None,
            }],
            ..Default::default()
        };

        let MergeOutcome::Updated { entity, touched } =
            merge_person(&store, person, &record, "scienti", 1_700_000_000)
                .await
                .expect("merge")
        else {
            panic!("expected update");
        };
        assert_eq!(entity.affiliations.len(), 1);
        assert_eq!(entity.affiliations[0].start_date, 1_500_000_000);
        assert_eq!(entity.affiliations[0].end_date, -1);
        assert!(touched.contains(&"affiliations"));

        // Second merge from another source adds nothing new to the history.
        let MergeOutcome::Updated { entity, touched } =
            merge_person(&store, entity, &record, "staff", 1_700_000_100)
                .await
                .expect("merge")
        else {
            panic!("expected update");
        };
        assert_eq!(entity.affiliations.len(), 1);
        assert!(!touched.contains(&"affiliations"));
    }

    #[tokio::test]
    async fn source_merge_unions_names_and_ids() {
        let mut venue = Source::template();
        venue.names.push(NameEntry {
            name: "Revista de Física".into(),
            lang: "es".into(),
            source: "scienti".into(),
        });
        venue.external_ids.push(ExternalId {
            source: "issn".into(),
            id: "1234-5678".into(),
        });
        venue.updated.push(Provenance {
            source: "scienti".into(),
            time: 1_600_000_000,
        });

        let record = ProviderRecord {
            kind: EntityKind::Source,
            names: vec![NameEntry {
                name: "Journal of Physics".into(),
                lang: "en".into(),
                source: "openalex".into(),
            }],
            external_ids: vec![
                ExternalId {
                    source: "issn".into(),
                    id: "1234-5678".into(),
                },
                ExternalId {
                    source: "openalex".into(),
                    id: "S12345".into(),
                },
            ],
            ..Default::default()
        };

        let MergeOutcome::Updated { entity, .. } =
            merge_source(venue, &record, "openalex", 1_700_000_000)
        else {
            panic!("expected update");
        };
        assert_eq!(entity.names.len(), 2);
        assert_eq!(entity.external_ids.len(), 2);

        // Guard on repeat.
        assert!(merge_source(entity, &record, "openalex", 1_700_000_200).is_skip());
    }

    #[test]
    fn work_fields_serializes_only_touched() {
        let work = existing_work();
        let fields = work_fields(&work, &["updated", "titles"]);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].0, "updated");
        assert_eq!(fields[1].0, "titles");
    }
}
