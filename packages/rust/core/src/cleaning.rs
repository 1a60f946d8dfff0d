//! Post-ingestion author-link cleaning.
//!
//! Author attribution through the similarity fallback can link a common
//! name to the wrong person. For persons backed by curated providers,
//! this pass re-checks every work author entry attributed to them: when
//! the entry's affiliation snapshots share nothing with the person's
//! recorded history, the link is cleared back to the empty-id sentinel.
//! The entity is never deleted; a later ingestion pass may re-resolve it.

use tracing::{debug, info};

use bibgraph_shared::{EntityKind, Result};
use bibgraph_storage::Store;

/// Providers curated enough to anchor a person's affiliation history.
pub const CURATED_SOURCES: &[&str] = &["scienti", "staff", "ranking"];

/// Run the cleaning pass. Returns the number of works whose author list
/// was rewritten.
pub async fn clean_author_links(store: &Store) -> Result<usize> {
    let mut person_ids: Vec<String> = Vec::new();
    for source in CURATED_SOURCES {
        for id in store.list_person_ids_updated_by(source).await? {
            if !person_ids.contains(&id) {
                person_ids.push(id);
            }
        }
    }

    let mut cleaned = 0;
    for person_id in &person_ids {
        let Some(person) = store.get_person(person_id).await? else {
            continue;
        };

        for mut work in store.works_with_author(person_id).await? {
            let mut changed = false;
            for author in work.authors.iter_mut().filter(|a| &a.id == person_id) {
                // No affiliation on the entry: nothing to contradict.
                if author.affiliations.is_empty() {
                    continue;
                }
                let mut found = false;
                for aff in &author.affiliations {
                    if aff.id.is_empty() {
                        continue;
                    }
                    if store.person_has_affiliation(&person.id, &aff.id).await? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    debug!(work = %work.id, person = %person.id, "clearing bad author link");
                    author.id = String::new();
                    changed = true;
                }
            }
            if changed {
                store
                    .update_fields(
                        EntityKind::Work,
                        &work.id,
                        &[(
                            "authors",
                            serde_json::to_value(&work.authors)
                                .map_err(|e| bibgraph_shared::BibgraphError::Store(e.to_string()))?,
                        )],
                    )
                    .await?;
                store
                    .remove_work_participant_person(&work.id, person_id)
                    .await?;
                cleaned += 1;
            }
        }
    }

    info!(persons = person_ids.len(), cleaned, "author cleaning pass done");
    Ok(cleaned)
}
