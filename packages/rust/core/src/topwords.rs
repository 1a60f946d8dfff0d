//! Top-words extraction for affiliations and persons.
//!
//! For every affiliation and person, the pass tallies lemmas over the
//! display titles of their works and stores the twenty most frequent.
//! Tokenization/lemmatization quality is out of scope: the pass depends
//! only on the [`Lemmatizer`] collaborator contract, and ships with a
//! plain lowercasing tokenizer.

use std::collections::HashMap;

use tracing::{debug, info};

use bibgraph_shared::{EntityKind, Result, TopWords, Work, WordCount};
use bibgraph_storage::Store;

/// Number of words kept per entity.
const TOP_N: usize = 20;

/// Minimum lemma length kept.
const MIN_LEMMA_LEN: usize = 4;

/// Stopwords dropped from title lemmas (es + en function words).
const STOPWORDS: &[&str] = &[
    "para", "por", "con", "una", "los", "las", "del", "sobre", "entre", "desde",
    "hacia", "como", "este", "esta", "estos", "estas", "donde", "cuando",
    "the", "and", "for", "with", "from", "about", "between", "into", "over",
    "under", "this", "that", "these", "those", "their", "where", "which",
    "based", "using", "toward", "towards",
];

/// Tokenizer/lemmatizer collaborator. Implementations may be language
/// aware; the default is not.
pub trait Lemmatizer: Send + Sync {
    /// Lemmas of `text` under language `lang` (ISO 639-1, possibly empty).
    fn lemmas(&self, text: &str, lang: &str) -> Vec<String>;
}

/// Lowercasing alphanumeric tokenizer; no morphological analysis.
pub struct SimpleLemmatizer;

impl Lemmatizer for SimpleLemmatizer {
    fn lemmas(&self, text: &str, _lang: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Tally the display-title lemmas of `works` into `counts`.
fn tally_titles(works: &[Work], lemmatizer: &dyn Lemmatizer, counts: &mut HashMap<String, u64>) {
    for work in works {
        let Some(title) = work.display_title() else {
            continue;
        };
        for lemma in lemmatizer.lemmas(&title.title, &title.lang) {
            if lemma.chars().all(|c| c.is_numeric()) {
                continue;
            }
            if lemma.chars().count() < MIN_LEMMA_LEN {
                continue;
            }
            if STOPWORDS.contains(&lemma.as_str()) {
                continue;
            }
            *counts.entry(lemma).or_insert(0) += 1;
        }
    }
}

/// The `TOP_N` most frequent words, descending by count (name breaks ties
/// for determinism).
fn top_words_of(counts: HashMap<String, u64>) -> Vec<WordCount> {
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
        .into_iter()
        .take(TOP_N)
        .map(|(name, value)| WordCount { name, value })
        .collect()
}

/// Compute and store top words for every affiliation lacking them, then
/// recompute organizational units (faculties, departments, groups) over
/// their members' works. Returns the number of artifacts written.
pub async fn top_words_for_affiliations(
    store: &Store,
    lemmatizer: &dyn Lemmatizer,
) -> Result<usize> {
    let mut written = 0;

    for aff_id in store.list_affiliation_ids().await? {
        if store
            .get_top_words(EntityKind::Affiliation, &aff_id)
            .await?
            .is_some()
        {
            continue;
        }
        let works = store.works_with_affiliation(&aff_id).await?;
        let mut counts = HashMap::new();
        tally_titles(&works, lemmatizer, &mut counts);
        store
            .set_top_words(
                EntityKind::Affiliation,
                &TopWords {
                    id: aff_id.clone(),
                    top_words: top_words_of(counts),
                },
            )
            .await?;
        written += 1;
    }

    // Units aggregate through their members: works rarely carry the
    // faculty/department directly.
    for unit_id in store.list_unit_affiliation_ids().await? {
        let mut counts = HashMap::new();
        for person_id in store.list_person_ids_with_affiliation(&unit_id).await? {
            let works = store.works_with_author(&person_id).await?;
            tally_titles(&works, lemmatizer, &mut counts);
        }
        debug!(unit = %unit_id, lemmas = counts.len(), "unit top words recomputed");
        store
            .set_top_words(
                EntityKind::Affiliation,
                &TopWords {
                    id: unit_id.clone(),
                    top_words: top_words_of(counts),
                },
            )
            .await?;
        written += 1;
    }

    info!(written, "affiliation top words pass done");
    Ok(written)
}

/// Compute and store top words for every person lacking them. Returns the
/// number of artifacts written.
pub async fn top_words_for_persons(store: &Store, lemmatizer: &dyn Lemmatizer) -> Result<usize> {
    let mut written = 0;
    for person_id in store.list_person_ids().await? {
        if store
            .get_top_words(EntityKind::Person, &person_id)
            .await?
            .is_some()
        {
            continue;
        }
        let works = store.works_with_author(&person_id).await?;
        let mut counts = HashMap::new();
        tally_titles(&works, lemmatizer, &mut counts);
        store
            .set_top_words(
                EntityKind::Person,
                &TopWords {
                    id: person_id.clone(),
                    top_words: top_words_of(counts),
                },
            )
            .await?;
        written += 1;
    }
    info!(written, "person top words pass done");
    Ok(written)
}
