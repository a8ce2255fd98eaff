//! Term normalization for shared-node identity
//!
//! Food and Tag nodes are keyed by the stem of their term. The same
//! `TermStemmer` must be used when resolving and when creating, otherwise
//! inflected forms stop converging on one node.

use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stemming language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Italian,
    English,
}

impl Language {
    fn algorithm(self) -> Algorithm {
        match self {
            Self::Italian => Algorithm::Italian,
            Self::English => Algorithm::English,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "italian" | "it" => Some(Self::Italian),
            "english" | "en" => Some(Self::English),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Italian => f.write_str("italian"),
            Self::English => f.write_str("english"),
        }
    }
}

/// Snowball stemmer producing dedup keys.
///
/// Cheap to clone; the underlying stemmer is shared.
#[derive(Clone)]
pub struct TermStemmer {
    language: Language,
    stemmer: Arc<Stemmer>,
}

impl TermStemmer {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            stemmer: Arc::new(Stemmer::create(language.algorithm())),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Normalize a term to its stem.
    ///
    /// Lowercases, splits on anything that is not alphanumeric, stems each
    /// word and joins the stems with a single space. Returns an empty string
    /// when the term has no words.
    pub fn stem(&self, term: &str) -> String {
        let lowered = term.to_lowercase();
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| self.stemmer.stem(w).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for TermStemmer {
    fn default() -> Self {
        Self::new(Language::default())
    }
}

impl std::fmt::Debug for TermStemmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermStemmer")
            .field("language", &self.language)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn italian_plural_and_singular_converge() {
        let stemmer = TermStemmer::new(Language::Italian);
        assert_eq!(stemmer.stem("pomodoro"), "pomodor");
        assert_eq!(stemmer.stem("pomodori"), "pomodor");
    }

    #[test]
    fn english_inflections_converge() {
        let stemmer = TermStemmer::new(Language::English);
        assert_eq!(stemmer.stem("tomato"), stemmer.stem("tomatoes"));
        assert_eq!(stemmer.stem("easy"), "easi");
    }

    #[test]
    fn case_and_whitespace_are_normalized() {
        let stemmer = TermStemmer::new(Language::Italian);
        assert_eq!(stemmer.stem("  Pomodori "), stemmer.stem("pomodoro"));
    }

    #[test]
    fn multi_word_terms_stem_each_word() {
        let stemmer = TermStemmer::new(Language::English);
        assert_eq!(stemmer.stem("Cherry Tomatoes"), format!("{} {}", stemmer.stem("cherry"), stemmer.stem("tomato")));
    }

    #[test]
    fn empty_term_has_empty_stem() {
        let stemmer = TermStemmer::default();
        assert_eq!(stemmer.stem("  -- "), "");
    }

    #[test]
    fn language_parses_short_and_long_names() {
        assert_eq!(Language::parse("IT"), Some(Language::Italian));
        assert_eq!(Language::parse("english"), Some(Language::English));
        assert_eq!(Language::parse("klingon"), None);
    }
}
