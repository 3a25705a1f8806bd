//! Genre detection over a fixed alias table.
//!
//! Queries like "sci-fi with humor" should rank science fiction before
//! whatever the embedding happens to prefer, so genre terms are detected
//! lexically first and the embedding only fills the gaps.

use std::collections::BTreeSet;

/// Alias → canonical genre (all lowercase).
const GENRE_ALIASES: &[(&str, &str)] = &[
    ("science fiction", "science fiction"),
    ("sci-fi", "science fiction"),
    ("scifi", "science fiction"),
    ("sf", "science fiction"),
    ("fantasy", "fantasy"),
    ("romance", "romance"),
    ("romantic", "romance"),
    ("dystopia", "dystopia"),
    ("dystopian", "dystopia"),
    ("nonfiction", "nonfiction"),
    ("non-fiction", "nonfiction"),
    ("non fiction", "nonfiction"),
    ("classic", "classic"),
    ("classics", "classic"),
    ("adventure", "adventure"),
    ("cyberpunk", "cyberpunk"),
    ("gothic", "gothic"),
    ("history", "history"),
    ("historical", "history"),
    ("epic", "epic"),
    ("survival", "survival"),
    ("political", "political fiction"),
    ("politics", "political fiction"),
    ("coming-of-age", "coming-of-age"),
    ("coming of age", "coming-of-age"),
    ("social commentary", "social commentary"),
    ("thriller", "thriller"),
    ("mystery", "mystery"),
    ("psychological", "psychological"),
    ("young adult", "young adult"),
    ("ya", "young adult"),
    ("contemporary", "contemporary fiction"),
    ("memoir", "memoir"),
    ("biography", "biography"),
    ("self-help", "self-help"),
    ("philosophy", "philosophy"),
];

const WORD_TRIM: &[char] = &['.', ',', '!', '?', ';', ':', '"', '(', ')', '[', ']', '{', '}'];

/// Detect canonical genres mentioned in `query`.
///
/// An exact-alias query short-circuits to that one genre; otherwise every
/// alias appearing as a substring counts; if still nothing matched, each
/// word (with surrounding punctuation trimmed) is tried as an exact alias.
/// The result is sorted for determinism.
pub fn detect_genres(query: &str) -> Vec<String> {
    let q = query.to_lowercase();
    let q = q.trim();
    let mut detected = BTreeSet::new();

    if let Some((_, canonical)) = GENRE_ALIASES.iter().find(|(alias, _)| *alias == q) {
        return vec![(*canonical).to_string()];
    }

    for (alias, canonical) in GENRE_ALIASES {
        if q.contains(alias) {
            detected.insert((*canonical).to_string());
        }
    }

    if detected.is_empty() {
        for word in q.split_whitespace() {
            let word = word.trim_matches(WORD_TRIM);
            if let Some((_, canonical)) = GENRE_ALIASES.iter().find(|(alias, _)| *alias == word) {
                detected.insert((*canonical).to_string());
            }
        }
    }

    detected.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias_short_circuits() {
        assert_eq!(detect_genres("Sci-Fi"), vec!["science fiction"]);
        assert_eq!(detect_genres("  ya "), vec!["young adult"]);
    }

    #[test]
    fn substring_scan_collects_multiple() {
        let detected = detect_genres("a dystopian thriller please");
        assert_eq!(detected, vec!["dystopia", "thriller"]);
    }

    #[test]
    fn short_alias_inside_punctuation_is_detected() {
        assert_eq!(detect_genres("recommend (sf) books"), vec!["science fiction"]);
    }

    #[test]
    fn no_genre_yields_empty() {
        assert!(detect_genres("something with sad robots").is_empty());
        assert!(detect_genres("").is_empty());
    }

    #[test]
    fn aliases_map_to_canonical_names() {
        assert_eq!(detect_genres("i want non fiction reads"), vec!["nonfiction"]);
        assert_eq!(detect_genres("romantic stories"), vec!["romance"]);
    }
}
