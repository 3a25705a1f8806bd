//! Book catalog layer.
//!
//! - **[`types`]**: normalized `Book` entity.
//! - **[`loader`]**: CSV loading with built-in fallback.
//! - **[`builtin`]**: the default book list shipped with the binary.
//!
//! The [`Catalog`] wrapper owns the book list and the structures derived
//! from it (genre vocabulary, fingerprint). The fingerprint is the
//! provisioning cache key for every step downstream of the catalog.

pub mod builtin;
pub mod loader;
pub mod types;

pub use loader::load_catalog;
pub use types::Book;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Catalog {
    books: Vec<Book>,
    genres: Vec<String>,
}

impl Catalog {
    pub fn new(books: Vec<Book>) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        for book in &books {
            for genre in &book.genres {
                seen.insert(genre.clone());
            }
        }
        let genres = seen.into_iter().collect();
        Self { books, genres }
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Book> {
        self.books.iter().find(|b| b.id == id)
    }

    /// All genres appearing in the catalog, sorted, in display form.
    pub fn genre_vocabulary(&self) -> &[String] {
        &self.genres
    }

    /// Index of the first book whose title appears verbatim (case-insensitive)
    /// inside `query`, scanning in catalog order.
    pub fn find_title_mention(&self, query: &str) -> Option<usize> {
        let q = query.to_lowercase();
        self.books
            .iter()
            .position(|b| !b.title.is_empty() && q.contains(&b.title.to_lowercase()))
    }

    /// Content fingerprint over every field that feeds recommendations.
    ///
    /// Field and record separators are control characters so that moving a
    /// comma between fields cannot produce a colliding digest.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for book in &self.books {
            hasher.update(book.id.to_le_bytes());
            hasher.update([0x1f]);
            hasher.update(book.title.as_bytes());
            hasher.update([0x1f]);
            hasher.update(book.author.as_bytes());
            hasher.update([0x1f]);
            hasher.update(book.description.as_bytes());
            hasher.update([0x1f]);
            hasher.update(book.genres.join(",").as_bytes());
            hasher.update([0x1e]);
        }
        hex::encode(hasher.finalize())
    }
}
