//! Fuzzy matching for near-duplicate geocoding inputs.
//!
//! "Hauptstr. 1, Berlin" and "hauptstraße 1 berlin" should hit the same
//! cached result. Inputs are normalized, then compared by Levenshtein
//! similarity against the most popular cached geocoding entries.

use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::error::Result;
use crate::traits::DurableStore;
use crate::types::CacheKind;

/// Tunables for fuzzy matching.
#[derive(Debug, Clone)]
pub struct FuzzyConfig {
    /// Minimum similarity for a match; 0.84 is rejected, 0.85 accepted.
    pub similarity_threshold: f64,
    /// How many popular entries to compare against per lookup.
    pub candidate_pool: usize,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            candidate_pool: 50,
        }
    }
}

/// An accepted fuzzy match.
#[derive(Debug, Clone)]
pub struct FuzzyMatch {
    pub entry: CacheEntry,
    pub similarity: f64,
}

/// Canonicalize an address string for comparison.
///
/// Lowercases, expands the German "str."/"strasse" abbreviations to
/// "straße" before stripping punctuation, drops everything that is not
/// alphanumeric or whitespace (keeping umlauts and ß), and collapses
/// whitespace runs.
pub fn normalize_address(input: &str) -> String {
    let lowered = input.to_lowercase();
    let expanded: Vec<String> = lowered
        .split_whitespace()
        .map(|token| {
            // Abbreviations canonicalize before punctuation stripping so
            // "hauptstr." and "hauptstrasse" both become "hauptstraße".
            // Trailing punctuation ("bahnhofstr.," etc.) would hide the
            // suffix, so drop it first; the general strip below removes
            // it from other tokens anyway.
            let token = token.trim_end_matches(|c: char| !c.is_alphanumeric());
            if let Some(stem) = token.strip_suffix("strasse") {
                format!("{stem}straße")
            } else if let Some(stem) = token.strip_suffix("str") {
                format!("{stem}straße")
            } else {
                token.to_string()
            }
        })
        .collect();

    let stripped: String = expanded
        .join(" ")
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character-based Levenshtein edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1]: `1 - distance / max_len` over characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Search the most popular cached geocoding entries for one whose
/// normalized input is close enough to `input`.
pub async fn find_similar(
    store: &dyn DurableStore,
    config: &FuzzyConfig,
    input: &str,
    now: DateTime<Utc>,
) -> Result<Option<FuzzyMatch>> {
    let needle = normalize_address(input);
    if needle.is_empty() {
        return Ok(None);
    }

    let candidates = store
        .top_by_hits(CacheKind::Geocoding, config.candidate_pool, now)
        .await?;

    let mut best: Option<FuzzyMatch> = None;
    for entry in candidates {
        let Some(normalized) = entry.metadata.normalized_input.as_deref() else {
            continue;
        };
        let score = similarity(&needle, normalized);
        if score < config.similarity_threshold {
            continue;
        }
        if best.as_ref().is_none_or(|b| score > b.similarity) {
            best = Some(FuzzyMatch {
                entry,
                similarity: score,
            });
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_unifies_german_street_variants() {
        assert_eq!(
            normalize_address("Hauptstr. 1, Berlin"),
            normalize_address("hauptstraße 1 berlin")
        );
        assert_eq!(
            normalize_address("Hauptstrasse 1, Berlin"),
            normalize_address("Hauptstraße 1 Berlin")
        );
    }

    #[test]
    fn abbreviation_expands_despite_trailing_punctuation() {
        assert_eq!(
            normalize_address("Bahnhofstr., 12"),
            normalize_address("Bahnhofstraße 12")
        );
        assert_eq!(
            normalize_address("Gartenstrasse, 3"),
            normalize_address("Gartenstraße 3")
        );
    }

    #[test]
    fn normalization_collapses_whitespace_and_punctuation() {
        assert_eq!(
            normalize_address("  Unter   den    Linden, 77!  "),
            "unter den linden 77"
        );
    }

    #[test]
    fn levenshtein_counts_character_edits() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("straße", "straße"), 0);
    }

    #[test]
    fn similarity_of_empty_strings_is_one() {
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn similarity_uses_character_counts_not_bytes() {
        // "straße" is 6 chars but 7 bytes; byte-based math would skew this.
        let s = similarity("straße", "strasse");
        assert!(s > 0.7 && s < 1.0);
    }
}
