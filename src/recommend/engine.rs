//! Recommendation engine.
//!
//! Strategy, in order:
//!
//! 1. **Title mention** — a query naming a catalog title is answered with
//!    that book's nearest neighbors (the book itself excluded).
//! 2. **Genre-first** — detected genre terms outrank embedding similarity;
//!    when there are not enough genre matches, the rest of the list is
//!    filled with the closest remaining books.
//! 3. **Semantic** — plain embedding similarity over the corpus index.
//!
//! Similarity scores are attached only where similarity did the ranking.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::catalog::{Book, Catalog};
use crate::recommend::genres::detect_genres;
use crate::search::canonicalize::canonicalize_for_embedding;
use crate::search::embedder::Embedder;
use crate::search::vector_index::{SearchFilter, VectorIndex, VectorSearchResult};

/// One recommendation on the wire. Flattens to the original book JSON with
/// an optional `score`.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendedBook {
    #[serde(flatten)]
    pub book: Book,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

pub struct Recommender {
    catalog: Arc<Catalog>,
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
}

impl Recommender {
    pub fn new(catalog: Arc<Catalog>, embedder: Arc<dyn Embedder>, index: VectorIndex) -> Self {
        Self {
            catalog,
            embedder,
            index,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.id()
    }

    pub fn recommend(&self, query: &str, k: usize) -> Result<Vec<RecommendedBook>> {
        let q = query.trim();
        if q.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        // 1) A mentioned title pivots the query onto that book's vector.
        if let Some(pos) = self.catalog.find_title_mention(q) {
            let book_id = self.catalog.books()[pos].id;
            if let Some(query_vec) = self.index.vector_for_book(book_id)? {
                debug!(book_id, strategy = "title", "recommend");
                let filter = SearchFilter::excluding([book_id]);
                let hits = self.index.search_top_k(&query_vec, k, Some(&filter))?;
                return Ok(self.resolve_scored(&hits));
            }
        }

        // 2) Genre terms outrank similarity.
        let detected = detect_genres(q);
        if !detected.is_empty() {
            let mut matches: Vec<&Book> = self
                .catalog
                .books()
                .iter()
                .filter(|b| b.has_genre_in(&detected))
                .collect();

            if matches.len() >= k {
                debug!(genres = ?detected, strategy = "genre", "recommend");
                matches.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
                return Ok(matches
                    .into_iter()
                    .take(k)
                    .map(|book| RecommendedBook {
                        book: book.clone(),
                        score: None,
                    })
                    .collect());
            }

            if !matches.is_empty() {
                debug!(genres = ?detected, strategy = "genre+fill", "recommend");
                let mut results: Vec<RecommendedBook> = matches
                    .iter()
                    .map(|book| RecommendedBook {
                        book: (*book).clone(),
                        score: None,
                    })
                    .collect();

                let used: HashSet<u32> = matches.iter().map(|b| b.id).collect();
                let remaining = k - results.len();
                let query_vec = self.embed_query(q)?;
                let filter = SearchFilter {
                    exclude: Some(used),
                };
                let hits = self.index.search_top_k(&query_vec, remaining, Some(&filter))?;
                results.extend(self.resolve_scored(&hits));
                results.truncate(k);
                return Ok(results);
            }
            // No catalog book carries the detected genre: fall through.
        }

        // 3) Plain semantic similarity.
        debug!(strategy = "semantic", "recommend");
        let query_vec = self.embed_query(q)?;
        let hits = self.index.search_top_k(&query_vec, k, None)?;
        Ok(self.resolve_scored(&hits))
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let canonical = canonicalize_for_embedding(query);
        let mut vectors = self
            .embedder
            .embed(&[canonical])
            .context("embed query")?;
        if vectors.is_empty() {
            return Err(anyhow!("embedder returned no vector for query"));
        }
        Ok(vectors.swap_remove(0))
    }

    fn resolve_scored(&self, hits: &[VectorSearchResult]) -> Vec<RecommendedBook> {
        hits.iter()
            .filter_map(|hit| {
                self.catalog.get(hit.book_id).map(|book| RecommendedBook {
                    book: book.clone(),
                    score: Some(hit.score),
                })
            })
            .collect()
    }
}
