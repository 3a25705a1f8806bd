//! Embedder trait for semantic recommendation (hash and ML implementations).

use std::path::PathBuf;

use thiserror::Error;

pub type EmbedderResult<T> = Result<T, EmbedderError>;

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("model files missing from {}: {missing:?}", dir.display())]
    ModelFilesMissing { dir: PathBuf, missing: Vec<String> },

    #[error("model load failed: {0}")]
    LoadFailed(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// A text embedder producing L2-normalized vectors.
///
/// Implementations must be deterministic for a fixed `(id, revision)` pair:
/// the vector index records both and refuses to serve queries embedded by
/// anything else.
pub trait Embedder: Send + Sync {
    /// Stable identifier, e.g. `minilm-384`. Part of the index file name.
    fn id(&self) -> &str;

    /// Model revision recorded in the index header.
    fn revision(&self) -> &str;

    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of canonicalized texts. Outputs are L2-normalized, so
    /// cosine similarity reduces to a dot product.
    fn embed(&self, texts: &[String]) -> EmbedderResult<Vec<Vec<f32>>>;
}

/// Normalize a vector in place. A zero vector is left untouched, which is
/// equivalent to dividing by 1.0.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
