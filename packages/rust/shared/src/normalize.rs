//! Text normalization and fuzzy scoring for entity matching.
//!
//! All comparisons in the resolver go through [`normalize`] first:
//! transliterate to ASCII, casefold, trim, drop periods. Scores are on a
//! 0–100 scale to match the configured matching thresholds.

use deunicode::deunicode;
use strsim::normalized_levenshtein;

/// Normalize a name or title for comparison: transliterate accents to
/// ASCII, lowercase, trim, and strip periods.
pub fn normalize(s: &str) -> String {
    deunicode(s).to_lowercase().trim().replace('.', "")
}

/// Normalize a title for similarity queries: [`normalize`] plus stripping
/// remaining punctuation and collapsing runs of whitespace.
pub fn normalize_title(s: &str) -> String {
    let cleaned: String = normalize(s)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Full-string similarity between two titles, 0–100.
pub fn title_score(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize(a), &normalize(b)) * 100.0
}

/// Partial-match score of `needle` against `hay`, 0–100.
///
/// The shorter string is slid across word windows of the longer one and
/// the best window similarity wins, so "garcia marquez" scores high
/// against "gabriel garcia marquez".
pub fn partial_score(needle: &str, hay: &str) -> f64 {
    let a = normalize(needle);
    let b = normalize(hay);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (short, long) = if a.split_whitespace().count() <= b.split_whitespace().count() {
        (&a, &b)
    } else {
        (&b, &a)
    };

    let short_words = short.split_whitespace().count();
    let long_words: Vec<&str> = long.split_whitespace().collect();

    let mut best = 0.0f64;
    for window in long_words.windows(short_words.max(1)) {
        let candidate = window.join(" ");
        let score = normalized_levenshtein(short, &candidate) * 100.0;
        if score > best {
            best = score;
        }
    }
    // The whole string is a candidate too (windows never see it when the
    // word counts differ).
    best.max(normalized_levenshtein(&a, &b) * 100.0)
}

/// Best partial-match score of an author name against a set of stored
/// author names, 0–100.
pub fn best_author_score(name: &str, stored: &[String]) -> f64 {
    stored
        .iter()
        .map(|s| partial_score(name, s))
        .fold(0.0, f64::max)
}

/// Normalized full-name equality (casing- and accent-insensitive).
pub fn names_equal(a: &str, b: &str) -> bool {
    !a.trim().is_empty() && normalize(a) == normalize(b)
}
