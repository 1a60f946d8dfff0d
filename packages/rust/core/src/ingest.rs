//! Ingestion orchestration.
//!
//! Every provider record is an independent unit of work: the orchestrator
//! fans records out over a bounded tokio worker pool, each task resolving
//! against the store through its own session. Failures are contained at
//! the record boundary — a bad record is logged and counted, never fatal
//! for the batch. There are no retries; re-running the feed is safe
//! because merges are provenance-guarded.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use bibgraph_shared::lang::EnsembleDetector;
use bibgraph_shared::{BibgraphError, EntityKind, IngestConfig, ProviderRecord, Result};
use bibgraph_similarity::{IndexedWork, SimilarityIndex};
use bibgraph_storage::Store;

use crate::assemble::{
    assemble_affiliation, assemble_person, assemble_source, assemble_work,
};
use crate::merge::{
    MergeOutcome, affiliation_fields, merge_affiliation, merge_person, merge_source, merge_work,
    person_fields, source_fields, work_fields,
};
use crate::network::build_network;
use crate::resolve::{resolve_person_by_external_ids, resolve_work};

/// Progress callback for reporting ingestion status.
pub trait IngestProgress: Send + Sync {
    /// Called after each record completes.
    fn record_done(&self, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn record_done(&self, _current: usize, _total: usize) {}
}

/// Tally of a completed ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// Fans provider records out to resolution, merge, and assembly.
pub struct Ingestor<S> {
    store: Arc<Store>,
    index: Option<S>,
    config: IngestConfig,
    detector: Arc<EnsembleDetector>,
    max_hits: usize,
}

impl<S: SimilarityIndex + Clone + 'static> Ingestor<S> {
    /// Build an ingestor over `store`, optionally backed by a similarity
    /// index for the fallback resolution stage.
    pub fn new(store: Store, index: Option<S>, config: IngestConfig, max_hits: usize) -> Self {
        Self {
            store: Arc::new(store),
            index,
            config,
            detector: Arc::new(EnsembleDetector::default_stack()),
            max_hits,
        }
    }

    /// Process a feed of records attributed to `source`.
    #[instrument(skip_all, fields(source, records = records.len()))]
    pub async fn run(
        &self,
        records: Vec<ProviderRecord>,
        source: &str,
        progress: &dyn IngestProgress,
    ) -> Result<IngestStats> {
        let total = records.len();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut stats = IngestStats::default();

        info!(workers = self.config.workers, total, "starting ingestion");

        let mut handles = Vec::with_capacity(total);
        for record in records {
            let sem = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let index = self.index.clone();
            let detector = Arc::clone(&self.detector);
            let config = self.config.clone();
            let source = source.to_string();
            let max_hits = self.max_hits;

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                // Each worker owns an independent store session.
                let session = store.session()?;
                process_record(
                    &session,
                    index.as_ref(),
                    &detector,
                    &record,
                    &source,
                    &config,
                    max_hits,
                )
                .await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            stats.processed += 1;
            match handle.await {
                Ok(Ok(RecordOutcome::Inserted)) => stats.inserted += 1,
                Ok(Ok(RecordOutcome::Updated)) => stats.updated += 1,
                Ok(Ok(RecordOutcome::Skipped)) => stats.skipped += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "record failed");
                    stats.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "worker task failed");
                    stats.failed += 1;
                }
            }
            progress.record_done(i + 1, total);
        }

        info!(
            processed = stats.processed,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            "ingestion done"
        );
        Ok(stats)
    }
}

/// Resolve, merge, or assemble one record.
async fn process_record<S: SimilarityIndex>(
    store: &Store,
    index: Option<&S>,
    detector: &EnsembleDetector,
    record: &ProviderRecord,
    source: &str,
    config: &IngestConfig,
    max_hits: usize,
) -> Result<RecordOutcome> {
    record.validate()?;
    let now = chrono::Utc::now().timestamp();

    match record.kind {
        EntityKind::Work => {
            process_work(store, index, detector, record, source, config, max_hits, now).await
        }
        EntityKind::Person => process_person(store, record, source, config, now).await,
        EntityKind::Affiliation => process_affiliation(store, record, source, config, now).await,
        EntityKind::Source => process_source(store, record, source, config, now).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_work<S: SimilarityIndex>(
    store: &Store,
    index: Option<&S>,
    detector: &EnsembleDetector,
    record: &ProviderRecord,
    source: &str,
    config: &IngestConfig,
    max_hits: usize,
    now: i64,
) -> Result<RecordOutcome> {
    if let Some(existing) = resolve_work(store, index, record, config.thresholds, max_hits).await? {
        return match merge_work(store, existing, record, source, detector, now).await? {
            MergeOutcome::Skip => Ok(RecordOutcome::Skipped),
            MergeOutcome::Updated { entity, touched } => {
                store
                    .update_fields(EntityKind::Work, &entity.id, &work_fields(&entity, &touched))
                    .await?;
                if touched.contains(&"external_ids") {
                    store
                        .index_external_ids(EntityKind::Work, &entity.id, &entity.external_ids)
                        .await?;
                }
                if touched.contains(&"authors") {
                    store
                        .index_work_participants(&entity.id, &entity.authors)
                        .await?;
                }
                if touched.contains(&"titles") {
                    if let Some(title) = entity.titles.last() {
                        store.index_work_title(&entity.id, &title.title).await?;
                    }
                }
                Ok(RecordOutcome::Updated)
            }
        };
    }

    if !config.insert_all {
        return Ok(RecordOutcome::Skipped);
    }

    let work = assemble_work(store, detector, record, source, now).await?;
    store.insert_work(&work).await?;

    // Index the new work so later records can match it by similarity.
    if let (Some(index), Some(title)) = (index, work.display_title()) {
        let indexed = IndexedWork {
            title: title.title.clone(),
            authors: work
                .authors
                .iter()
                .filter(|a| !a.full_name.is_empty())
                .map(|a| a.full_name.clone())
                .collect(),
            source: work.source.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
            year: work
                .year_published
                .map(|y| y.to_string())
                .unwrap_or_else(|| "0".into()),
            volume: work.bibliographic_info.volume.clone().unwrap_or_default(),
            issue: work.bibliographic_info.issue.clone().unwrap_or_default(),
            first_page: work
                .bibliographic_info
                .start_page
                .clone()
                .unwrap_or_default(),
            last_page: work.bibliographic_info.end_page.clone().unwrap_or_default(),
        };
        if let Err(e) = index.index_work(&work.id, &indexed).await {
            warn!(work = %work.id, error = %e, "failed to index work for similarity");
        }
    }

    Ok(RecordOutcome::Inserted)
}

async fn process_person(
    store: &Store,
    record: &ProviderRecord,
    source: &str,
    config: &IngestConfig,
    now: i64,
) -> Result<RecordOutcome> {
    let existing = resolve_person_by_external_ids(store, &record.external_ids).await?;
    if let Some(existing) = existing {
        return match merge_person(store, existing, record, source, now).await? {
            MergeOutcome::Skip => Ok(RecordOutcome::Skipped),
            MergeOutcome::Updated { entity, touched } => {
                store
                    .update_fields(
                        EntityKind::Person,
                        &entity.id,
                        &person_fields(&entity, &touched),
                    )
                    .await?;
                if touched.contains(&"external_ids") {
                    store
                        .index_external_ids(EntityKind::Person, &entity.id, &entity.external_ids)
                        .await?;
                }
                Ok(RecordOutcome::Updated)
            }
        };
    }

    if !config.insert_all {
        return Ok(RecordOutcome::Skipped);
    }
    let person = assemble_person(store, record, source, now).await?;
    store.insert_person(&person).await?;
    Ok(RecordOutcome::Inserted)
}

async fn process_affiliation(
    store: &Store,
    record: &ProviderRecord,
    source: &str,
    config: &IngestConfig,
    now: i64,
) -> Result<RecordOutcome> {
    let mut existing = None;
    for ext in &record.external_ids {
        existing = store.find_affiliation_by_external_id(&ext.id).await?;
        if existing.is_some() {
            break;
        }
    }
    if existing.is_none() {
        if let Some(name) = record.names.first() {
            existing = store.find_affiliation_by_name(&name.name).await?;
        }
    }

    if let Some(existing) = existing {
        return match merge_affiliation(store, existing, record, source, now).await? {
            MergeOutcome::Skip => Ok(RecordOutcome::Skipped),
            MergeOutcome::Updated { entity, touched } => {
                store
                    .update_fields(
                        EntityKind::Affiliation,
                        &entity.id,
                        &affiliation_fields(&entity, &touched),
                    )
                    .await?;
                if touched.contains(&"external_ids") {
                    store
                        .index_external_ids(
                            EntityKind::Affiliation,
                            &entity.id,
                            &entity.external_ids,
                        )
                        .await?;
                }
                if touched.contains(&"names") {
                    for name in &entity.names {
                        store
                            .index_name(EntityKind::Affiliation, &entity.id, &name.name)
                            .await?;
                    }
                }
                Ok(RecordOutcome::Updated)
            }
        };
    }

    if !config.insert_all {
        return Ok(RecordOutcome::Skipped);
    }
    let aff = assemble_affiliation(store, record, source, now).await?;
    store.insert_affiliation(&aff).await?;
    Ok(RecordOutcome::Inserted)
}

async fn process_source(
    store: &Store,
    record: &ProviderRecord,
    source: &str,
    config: &IngestConfig,
    now: i64,
) -> Result<RecordOutcome> {
    let mut existing = None;
    for ext in &record.external_ids {
        existing = store.find_source_by_external_id(&ext.id).await?;
        if existing.is_some() {
            break;
        }
    }

    if let Some(existing) = existing {
        return match merge_source(existing, record, source, now) {
            MergeOutcome::Skip => Ok(RecordOutcome::Skipped),
            MergeOutcome::Updated { entity, touched } => {
                store
                    .update_fields(
                        EntityKind::Source,
                        &entity.id,
                        &source_fields(&entity, &touched),
                    )
                    .await?;
                if touched.contains(&"external_ids") {
                    store
                        .index_external_ids(EntityKind::Source, &entity.id, &entity.external_ids)
                        .await?;
                }
                if touched.contains(&"names") {
                    for name in &entity.names {
                        store
                            .index_name(EntityKind::Source, &entity.id, &name.name)
                            .await?;
                    }
                }
                Ok(RecordOutcome::Updated)
            }
        };
    }

    if !config.insert_all {
        return Ok(RecordOutcome::Skipped);
    }
    let venue = assemble_source(record, source, now);
    store.insert_source(&venue).await?;
    Ok(RecordOutcome::Inserted)
}

// ---------------------------------------------------------------------------
// Post-calculation fan-out
// ---------------------------------------------------------------------------

/// Build co-authorship networks for every seed of `kind` over a bounded
/// worker pool. Returns the number of seeds processed.
pub async fn build_all_networks(
    store: &Store,
    kind: EntityKind,
    max_authors: usize,
    workers: usize,
) -> Result<usize> {
    let seeds = match kind {
        EntityKind::Affiliation => store.list_affiliation_ids().await?,
        EntityKind::Person => store.list_participant_person_ids().await?,
        _ => {
            return Err(BibgraphError::validation(format!(
                "networks are built for affiliations or persons, not {kind}"
            )));
        }
    };
    let total = seeds.len();
    info!(kind = %kind, total, workers, "building networks");

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let store = Arc::new(store.session()?);
    let mut handles = Vec::with_capacity(total);
    for seed in seeds {
        let sem = Arc::clone(&semaphore);
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let session = store.session()?;
            build_network(&session, &seed, kind, max_authors).await
        }));
    }

    let mut processed = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(Some(_))) => processed += 1,
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(error = %e, "network build failed"),
            Err(e) => warn!(error = %e, "network worker failed"),
        }
    }
    Ok(processed)
}
