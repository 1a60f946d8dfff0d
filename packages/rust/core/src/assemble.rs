//! Building new canonical entities from provider records.
//!
//! Assembly starts from an empty entity template, copies the mapped
//! fields, and resolves every nested reference (author, affiliation,
//! venue) against the store with the strong-key-then-exact-name cascade —
//! never the similarity index. Unresolved references keep their literal
//! provider-supplied name with the empty-id sentinel so a later pass can
//! still reconcile them.

use tracing::debug;

use bibgraph_shared::lang::EnsembleDetector;
use bibgraph_shared::{
    Affiliation, AffiliationPeriod, AffiliationRef, Person, Provenance, ProviderRecord, Relation,
    Result, Source, TitleEntry, VenueRef, Work, WorkAuthor,
};
use bibgraph_storage::Store;

use crate::merge::{is_thesis, organizational_units, propagate_education_relations};
use crate::resolve::{
    record_external_ids, resolve_nested_affiliation, resolve_nested_person, resolve_nested_source,
};

/// Build a new canonical work from a provider record.
pub async fn assemble_work(
    store: &Store,
    detector: &EnsembleDetector,
    record: &ProviderRecord,
    source_name: &str,
    now: i64,
) -> Result<Work> {
    let mut work = Work::template();
    work.updated.push(Provenance {
        source: source_name.into(),
        time: now,
    });

    for title in &record.titles {
        let lang = title
            .lang
            .clone()
            .or_else(|| detector.detect(&title.title))
            .unwrap_or_default();
        work.titles.push(TitleEntry {
            title: title.title.clone(),
            lang,
            source: source_name.into(),
        });
    }

    work.external_ids = record_external_ids(record);
    work.types = record.types.clone();
    work.bibliographic_info = record.bibliographic_info.clone();
    work.citations_count = record.citations_count.clone();
    work.citations_by_year = record.citations_by_year.clone();
    work.year_published = record.year_published;
    work.date_published = record.date_published;
    work.ranking = record.ranking.clone();

    // Venue: resolve by external id; unresolved keeps the literal name.
    if let Some(venue) = &record.venue {
        work.source = Some(match resolve_nested_source(store, venue).await? {
            Some(stored) => VenueRef {
                id: stored.id.clone(),
                name: stored.display_name().to_string(),
            },
            None => {
                debug!(name = %venue.name, "venue not found in store");
                VenueRef {
                    id: String::new(),
                    name: venue.name.clone(),
                }
            }
        });
    }

    // Research group credited on the work.
    let group = match record.group_code.as_deref() {
        Some(code) => store.find_affiliation_by_external_id(code).await?,
        None => None,
    };
    if let Some(group) = &group {
        work.groups.push(bibgraph_shared::GroupRef {
            id: group.id.clone(),
            name: group.display_name().to_string(),
        });
    }

    // Authors, with nested affiliation resolution.
    let thesis = is_thesis(record);
    let mut first_resolved: Option<(usize, Person)> = None;
    for mention in &record.authors {
        let person = resolve_nested_person(store, mention).await?;

        let mut affiliations = Vec::new();
        for aff in &mention.affiliations {
            let entry = match resolve_nested_affiliation(store, &aff.external_ids, &aff.name)
                .await?
            {
                Some(stored) => AffiliationRef {
                    id: stored.id.clone(),
                    name: stored.display_name().trim().to_string(),
                    types: stored.types.clone(),
                },
                None => AffiliationRef {
                    id: String::new(),
                    name: aff.name.clone(),
                    types: Vec::new(),
                },
            };
            if !entry.id.is_empty() && affiliations.iter().any(|a: &AffiliationRef| a.id == entry.id)
            {
                continue;
            }
            affiliations.push(entry);
        }

        let (id, full_name) = match &person {
            Some(person) => (person.id.clone(), person.full_name.clone()),
            None => (String::new(), mention.full_name.clone()),
        };
        if full_name.trim().is_empty() {
            // An empty author carries no information; drop the mention.
            continue;
        }

        let was_identified = !mention.external_ids.is_empty() && person.is_some();
        work.authors.push(WorkAuthor {
            id,
            full_name,
            affiliations,
            role: (thesis && was_identified).then(|| "advisor".to_string()),
        });
        if was_identified && first_resolved.is_none() {
            if let Some(person) = person {
                first_resolved = Some((work.authors.len() - 1, person));
            }
        }
    }

    // Education relations and organizational units for the identified
    // author, mirroring the update path.
    if let (Some((index, person)), Some(group)) = (&first_resolved, &group) {
        propagate_education_relations(&mut work.authors[*index], group);
        let units = organizational_units(store, person, &work.authors[*index].affiliations).await?;
        let author = &mut work.authors[*index];
        for unit in units {
            if !author.affiliations.iter().any(|a| a.id == unit.id) {
                author.affiliations.push(unit);
            }
        }
    }

    work.author_count = work.authors.len();
    Ok(work)
}

/// Build a new canonical person from a provider record.
pub async fn assemble_person(
    store: &Store,
    record: &ProviderRecord,
    source_name: &str,
    now: i64,
) -> Result<Person> {
    let mut person = Person::template();
    person.updated.push(Provenance {
        source: source_name.into(),
        time: now,
    });

    person.full_name = record.full_name.clone().unwrap_or_default();
    person.first_names = record.first_names.clone();
    person.last_names = record.last_names.clone();
    person.initials = record
        .first_names
        .iter()
        .filter_map(|n| n.chars().next())
        .map(|c| c.to_uppercase().to_string())
        .collect();
    person.external_ids = record.external_ids.clone();
    person.aliases = record.aliases.iter().map(|a| a.to_lowercase()).collect();
    person.ranking = record.ranking.clone();

    for aff in &record.affiliations {
        let Some(resolved) = resolve_nested_affiliation(store, &aff.external_ids, &aff.name).await?
        else {
            debug!(name = %aff.name, "affiliation not found for person record");
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
    }

    Ok(person)
}

/// Build a new canonical affiliation from a provider record.
pub async fn assemble_affiliation(
    store: &Store,
    record: &ProviderRecord,
    source_name: &str,
    now: i64,
) -> Result<Affiliation> {
    let mut aff = Affiliation::template();
    aff.updated.push(Provenance {
        source: source_name.into(),
        time: now,
    });
    aff.names = record.names.clone();
    aff.types = record.types.clone();
    aff.external_ids = record.external_ids.clone();

    for relation in &record.relations {
        let entry = match resolve_nested_affiliation(store, &relation.external_ids, &relation.name)
            .await?
        {
            Some(target) => Relation {
                id: target.id.clone(),
                name: target.display_name().to_string(),
                types: target.types.clone(),
            },
            None => Relation {
                id: String::new(),
                name: relation.name.clone(),
                types: relation.types.clone(),
            },
        };
        if !entry.id.is_empty() && aff.relations.iter().any(|r| r.id == entry.id) {
            continue;
        }
        aff.relations.push(entry);
    }

    Ok(aff)
}

/// Build a new canonical publication source from a provider record.
pub fn assemble_source(record: &ProviderRecord, source_name: &str, now: i64) -> Source {
    let mut venue = Source::template();
    venue.updated.push(Provenance {
        source: source_name.into(),
        time: now,
    });
    venue.names = record.names.clone();
    venue.external_ids = record.external_ids.clone();
    venue.types = record.types.clone();
    venue.publisher = record.publisher.clone();
    venue.abbreviations = record.abbreviations.clone();
    venue
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibgraph_shared::{
        EntityKind, ExternalId, NameEntry, RecordAffiliation, RecordAuthor, RecordRelation,
        RecordTitle, RecordVenue, TypeEntry,
    };
    use uuid::Uuid;

    async fn test_store() -> Store {
        let tmp = std::env::temp_dir().join(format!("bibgraph_assemble_{}.db", Uuid::now_v7()));
        Store::open(&tmp).await.expect("open test store")
    }

    fn detector() -> EnsembleDetector {
        EnsembleDetector::default_stack()
    }

    #[tokio::test]
    async fn work_assembly_resolves_venue_and_authors() {
        let store = test_store().await;

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
        store.insert_source(&venue).await.unwrap();

        let mut aff = Affiliation::template();
        aff.names.push(NameEntry {
            name: "Universidad de Antioquia".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        aff.external_ids.push(ExternalId {
            source: "ror".into(),
            id: "ror-udea".into(),
        });
        store.insert_affiliation(&aff).await.unwrap();

        let mut person = Person::template();
        person.full_name = "Ana Pérez".into();
        person.external_ids.push(ExternalId {
            source: "orcid".into(),
            id: "0000-0001".into(),
        });
        store.insert_person(&person).await.unwrap();

        let record = ProviderRecord {
            kind: EntityKind::Work,
            titles: vec![RecordTitle {
                title: "Análisis de redes de coautoría".into(),
                lang: None,
            }],
            external_ids: vec![ExternalId {
                source: "doi".into(),
                id: "10.1/new".into(),
            }],
            venue: Some(RecordVenue {
                name: "Rev. Fis.".into(),
                external_ids: vec![ExternalId {
                    source: "issn".into(),
                    id: "1234-5678".into(),
                }],
            }),
            authors: vec![
                RecordAuthor {
                    full_name: "Ana Perez".into(),
                    external_ids: vec![ExternalId {
                        source: "orcid".into(),
                        id: "0000-0001".into(),
                    }],
                    affiliations: vec![RecordAffiliation {
                        name: "Universidad de Antioquia".into(),
                        external_ids: vec![ExternalId {
                            source: "ror".into(),
                            id: "ror-udea".into(),
                        }],
                        start_date: None,
                        end_date: None,
                    }],
                },
                RecordAuthor {
                    full_name: "Desconocido Autor".into(),
                    external_ids: vec![],
                    affiliations: vec![RecordAffiliation {
                        name: "Some Foreign Institute".into(),
                        external_ids: vec![],
                        start_date: None,
                        end_date: None,
                    }],
                },
            ],
            ..Default::default()
        };

        let work = assemble_work(&store, &detector(), &record, "scienti", 1_700_000_000)
            .await
            .expect("assemble");

        assert!(work.provenanced_by("scienti"));
        assert_eq!(work.titles.len(), 1);
        assert_eq!(work.titles[0].lang, "es");
        assert_eq!(work.titles[0].source, "scienti");

        let venue_ref = work.source.expect("venue");
        assert_eq!(venue_ref.id, venue.id);
        assert_eq!(venue_ref.name, "Revista de Física");

        assert_eq!(work.author_count, 2);
        // First author resolved by identifier, canonical spelling kept.
        assert_eq!(work.authors[0].id, person.id);
        assert_eq!(work.authors[0].full_name, "Ana Pérez");
        assert_eq!(work.authors[0].affiliations[0].id, aff.id);
        // Second author unresolved: literal name, empty-id sentinel.
        assert_eq!(work.authors[1].id, "");
        assert_eq!(work.authors[1].full_name, "Desconocido Autor");
        assert_eq!(work.authors[1].affiliations[0].id, "");
        assert_eq!(work.authors[1].affiliations[0].name, "Some Foreign Institute");
    }

    #[tokio::test]
    async fn unresolved_venue_keeps_literal_name() {
        let store = test_store().await;
        let record = ProviderRecord {
            kind: EntityKind::Work,
            titles: vec![RecordTitle {
                title: "A lonely preprint".into(),
                lang: Some("en".into()),
            }],
            venue: Some(RecordVenue {
                name: "Unknown Journal".into(),
                external_ids: vec![ExternalId {
                    source: "issn".into(),
                    id: "0000-0000".into(),
                }],
            }),
            ..Default::default()
        };

        let work = assemble_work(&store, &detector(), &record, "openalex", 1_700_000_000)
            .await
            .expect("assemble");
        let venue_ref = work.source.expect("venue kept");
        assert_eq!(venue_ref.id, "");
        assert_eq!(venue_ref.name, "Unknown Journal");
    }

    #[tokio::test]
    async fn person_assembly_builds_initials_and_history() {
        let store = test_store().await;
        let mut aff = Affiliation::template();
        aff.names.push(NameEntry {
            name: "Instituto Y".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        aff.external_ids.push(ExternalId {
            source: "staff".into(),
            id: "U-77".into(),
        });
        store.insert_affiliation(&aff).await.unwrap();

        let record = ProviderRecord {
            kind: EntityKind::Person,
            full_name: Some("María José Restrepo Vélez".into()),
            first_names: vec!["María".into(), "José".into()],
            last_names: vec!["Restrepo".into(), "Vélez".into()],
            aliases: vec!["M. J. Restrepo".into()],
            external_ids: vec![ExternalId {
                source: "scienti".into(),
                id: "RH-10".into(),
            }],
            affiliations: vec![RecordAffiliation {
                name: "Instituto Y".into(),
                external_ids: vec![ExternalId {
                    source: "staff".into(),
                    id: "U-77".into(),
                }],
                start_date: Some(1_400_000_000),
                end_date: None,
            }],
            ..Default::default()
        };

        let person = assemble_person(&store, &record, "scienti", 1_700_000_000)
            .await
            .expect("assemble");
        assert_eq!(person.initials, "MJ");
        assert_eq!(person.aliases, vec!["m. j. restrepo".to_string()]);
        assert_eq!(person.affiliations.len(), 1);
        assert_eq!(person.affiliations[0].id, aff.id);
        assert_eq!(person.affiliations[0].start_date, 1_400_000_000);
    }

    #[tokio::test]
    async fn affiliation_assembly_resolves_relations() {
        let store = test_store().await;
        let mut inst = Affiliation::template();
        inst.names.push(NameEntry {
            name: "Universidad de Antioquia".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        store.insert_affiliation(&inst).await.unwrap();

        let record = ProviderRecord {
            kind: EntityKind::Affiliation,
            names: vec![NameEntry {
                name: "Facultad de Medicina".into(),
                lang: "es".into(),
                source: "staff".into(),
            }],
            types: vec![TypeEntry {
                source: "staff".into(),
                value: "faculty".into(),
                level: None,
            }],
            relations: vec![
                RecordRelation {
                    name: "Universidad de Antioquia".into(),
                    external_ids: vec![],
                    types: vec![],
                },
                RecordRelation {
                    name: "Missing Parent".into(),
                    external_ids: vec![],
                    types: vec![],
                },
            ],
            ..Default::default()
        };

        let aff = assemble_affiliation(&store, &record, "staff", 1_700_000_000)
            .await
            .expect("assemble");
        assert_eq!(aff.relations.len(), 2);
        assert_eq!(aff.relations[0].id, inst.id);
        assert_eq!(aff.relations[1].id, "");
        assert_eq!(aff.relations[1].name, "Missing Parent");
    }

    #[test]
    fn source_assembly_copies_mapped_fields() {
        let record = ProviderRecord {
            kind: EntityKind::Source,
            names: vec![NameEntry {
                name: "Journal of Networks".into(),
                lang: "en".into(),
                source: "openalex".into(),
            }],
            external_ids: vec![
                ExternalId {
                    source: "issn_l".into(),
                    id: "9999-0001".into(),
                },
                ExternalId {
                    source: "openalex".into(),
                    id: "S777".into(),
                },
            ],
            abbreviations: vec!["J. Netw.".into()],
            ..Default::default()
        };

        let venue = assemble_source(&record, "openalex", 1_700_000_000);
        assert!(venue.provenanced_by("openalex"));
        assert_eq!(venue.names.len(), 1);
        assert_eq!(venue.external_ids.len(), 2);
        assert_eq!(venue.abbreviations, vec!["J. Netw.".to_string()]);
    }
}
