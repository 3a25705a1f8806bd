//! Recommendation layer.
//!
//! - **[`genres`]**: lexical genre detection over a fixed alias table.
//! - **[`engine`]**: the ordered title → genre → semantic strategy.

pub mod engine;
pub mod genres;

pub use engine::{RecommendedBook, Recommender};
