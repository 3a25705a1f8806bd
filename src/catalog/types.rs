//! Normalized catalog entity structs.

use serde::{Deserialize, Serialize};

/// A single catalog entry.
///
/// Serialized shape matches the `/recommend` wire format: `cover` is omitted
/// when no cover art directory is configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: u32,
    pub title: String,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cover: Option<String>,
}

impl Book {
    /// Text that feeds the corpus embedding: title, author and description
    /// joined by single spaces.
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.title, self.author, self.description)
    }

    /// Case-normalized genre list for matching.
    pub fn genres_lower(&self) -> Vec<String> {
        self.genres.iter().map(|g| g.to_lowercase()).collect()
    }

    pub fn has_genre_in(&self, detected: &[String]) -> bool {
        if detected.is_empty() {
            return false;
        }
        let lower = self.genres_lower();
        detected.iter().any(|d| lower.iter().any(|g| g == d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Book {
        Book {
            id: 1,
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            description: "Epic science fiction.".into(),
            genres: vec!["Science Fiction".into(), "Adventure".into()],
            cover: None,
        }
    }

    #[test]
    fn embedding_text_joins_fields() {
        assert_eq!(sample().embedding_text(), "Dune Frank Herbert Epic science fiction.");
    }

    #[test]
    fn genre_matching_is_case_insensitive() {
        let book = sample();
        assert!(book.has_genre_in(&["science fiction".into()]));
        assert!(!book.has_genre_in(&["romance".into()]));
        assert!(!book.has_genre_in(&[]));
    }

    #[test]
    fn cover_is_omitted_from_json_when_none() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("cover"));

        let mut with_cover = sample();
        with_cover.cover = Some("/static/covers/1.jpg".into());
        let json = serde_json::to_string(&with_cover).unwrap();
        assert!(json.contains("/static/covers/1.jpg"));
    }
}
