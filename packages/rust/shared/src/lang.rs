//! Ensemble language detection for titles and names.
//!
//! Detection quality is deliberately out of scope: the contract the rest
//! of the system depends on is the voting policy of [`EnsembleDetector`] —
//! plurality over more than half of the votes cast, else unknown. Detectors
//! are pluggable behind [`LanguageDetector`].

/// A single language detector. Returns an ISO 639-1 code, or `None` when
/// the detector abstains.
pub trait LanguageDetector: Send + Sync {
    /// Detector name, for logging.
    fn name(&self) -> &'static str;
    /// Detect the language of `text`.
    fn detect(&self, text: &str) -> Option<String>;
}

/// Majority-vote ensemble over independent detectors.
pub struct EnsembleDetector {
    detectors: Vec<Box<dyn LanguageDetector>>,
}

impl EnsembleDetector {
    /// Build an ensemble from explicit detectors.
    pub fn new(detectors: Vec<Box<dyn LanguageDetector>>) -> Self {
        Self { detectors }
    }

    /// The default detector stack (lexicon + diacritic heuristics).
    pub fn default_stack() -> Self {
        Self::new(vec![
            Box::new(LexiconDetector),
            Box::new(DiacriticDetector),
        ])
    }

    /// Detect the language of `text` by plurality vote.
    ///
    /// A candidate wins when its votes exceed half of the votes cast.
    /// Abstentions do not count toward the denominator. Returns `None`
    /// ("unknown") when no candidate reaches the bar.
    pub fn detect(&self, text: &str) -> Option<String> {
        let text = text.to_lowercase().replace('\n', " ");
        let votes: Vec<String> = self
            .detectors
            .iter()
            .filter_map(|d| d.detect(&text))
            .collect();
        if votes.is_empty() {
            return None;
        }

        let mut seen: Vec<&String> = Vec::new();
        for prospect in &votes {
            if seen.contains(&prospect) {
                continue;
            }
            seen.push(prospect);
            let count = votes.iter().filter(|v| *v == prospect).count();
            if count * 2 > votes.len() {
                return Some(prospect.clone());
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Built-in detectors
// ---------------------------------------------------------------------------

const ES_WORDS: &[&str] = &[
    "el", "la", "los", "las", "de", "del", "en", "un", "una", "para", "por",
    "con", "sobre", "entre", "desde", "hacia", "estudio", "análisis", "red",
];
const EN_WORDS: &[&str] = &[
    "the", "of", "and", "in", "for", "with", "from", "about", "between",
    "study", "analysis", "network", "towards", "among", "using",
];
const PT_WORDS: &[&str] = &[
    "o", "os", "das", "dos", "em", "um", "uma", "não", "são", "como", "estudo",
];
const FR_WORDS: &[&str] = &[
    "le", "les", "des", "du", "dans", "une", "pour", "avec", "sur", "étude",
];

/// Function-word frequency detector over a tiny per-language lexicon.
struct LexiconDetector;

impl LanguageDetector for LexiconDetector {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    fn detect(&self, text: &str) -> Option<String> {
        let tables: [(&str, &[&str]); 4] = [
            ("es", ES_WORDS),
            ("en", EN_WORDS),
            ("pt", PT_WORDS),
            ("fr", FR_WORDS),
        ];
        let mut best: Option<(&str, usize)> = None;
        for (code, words) in tables {
            let hits = text
                .split(|c: char| !c.is_alphabetic())
                .filter(|w| !w.is_empty() && words.contains(w))
                .count();
            if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
                best = Some((code, hits));
            }
        }
        best.map(|(code, _)| code.to_string())
    }
}

/// Diacritic-signature detector; abstains on plain ASCII unless an English
/// function word confirms.
struct DiacriticDetector;

impl LanguageDetector for DiacriticDetector {
    fn name(&self) -> &'static str {
        "diacritic"
    }

    fn detect(&self, text: &str) -> Option<String> {
        if text.chars().any(|c| "ãõç".contains(c)) {
            return Some("pt".to_string());
        }
        if text.chars().any(|c| "ñ¿¡".contains(c)) {
            return Some("es".to_string());
        }
        if text.chars().any(|c| "èêëœùûî".contains(c)) {
            return Some("fr".to_string());
        }
        if text.chars().any(|c| "áéíóú".contains(c)) {
            return Some("es".to_string());
        }
        if text.is_ascii()
            && text
                .split_whitespace()
                .any(|w| ["the", "of", "and", "with"].contains(&w))
        {
            return Some("en".to_string());
        }
        None
    }
}
