//! Catalog CSV loading with built-in fallback.
//!
//! The catalog file is a plain CSV with a header row
//! (`title,author,description,genres`). Genres are comma-separated inside
//! the cell. Any failure to read or parse the file falls back to the
//! built-in list rather than aborting: the catalog is a manifest the
//! service can always stage, and provisioning decides later whether the
//! staged content changed.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::builtin::default_books;
use super::types::Book;
use super::Catalog;

/// Load the catalog from `csv_path`, falling back to the built-in list when
/// the file is missing or unreadable.
///
/// `static_dir` is the cover-art root; when it exists, each book is given a
/// `/static/covers/{id}.jpg` cover path.
pub fn load_catalog(csv_path: &Path, static_dir: Option<&Path>) -> Catalog {
    match read_catalog_csv(csv_path, static_dir) {
        Ok(books) => {
            info!(count = books.len(), path = %csv_path.display(), "catalog_loaded");
            Catalog::new(books)
        }
        Err(err) => {
            warn!(
                path = %csv_path.display(),
                error = %err,
                "catalog_csv_unavailable, using default book list"
            );
            Catalog::new(default_books())
        }
    }
}

/// Parse the catalog CSV. Ids are assigned 1-based in file order.
pub fn read_catalog_csv(path: &Path, static_dir: Option<&Path>) -> Result<Vec<Book>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open catalog csv {}", path.display()))?;

    let headers = reader.headers().context("read catalog header row")?.clone();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let title_col = col("title");
    let author_col = col("author");
    let description_col = col("description");
    let genres_col = col("genres");

    let covers_enabled = static_dir.is_some_and(Path::exists);

    let mut books = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("read catalog row {}", idx + 1))?;
        let field = |col: Option<usize>, default: &str| -> String {
            col.and_then(|c| record.get(c))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        let id = idx as u32 + 1;
        let cover = covers_enabled.then(|| format!("/static/covers/{id}.jpg"));

        books.push(Book {
            id,
            title: field(title_col, "Unknown Title"),
            author: field(author_col, "Unknown Author"),
            description: field(description_col, "No description available"),
            genres: parse_genres(&field(genres_col, "")),
            cover,
        });
    }

    Ok(books)
}

/// Split a comma-separated genre cell. A literal `nan` cell (a common CSV
/// export artifact) counts as empty.
fn parse_genres(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Vec::new();
    }
    cell.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}
