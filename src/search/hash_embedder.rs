//! FNV-1a feature-hashing embedder (deterministic fallback).
//!
//! No model files, no network: each lowercased alphanumeric token is hashed
//! into one of `dimension` buckets with a hash-derived sign, and the result
//! is L2-normalized. Quality is far below the ML embedder, but the output is
//! fully deterministic, which keeps the index and recommendation paths
//! testable offline and gives the service an explicit degraded mode.

use crate::search::embedder::{l2_normalize, Embedder, EmbedderResult};

pub const HASH_EMBEDDER_ID: &str = "fnv1a-384";
pub const HASH_EMBEDDER_REVISION: &str = "1";
pub const HASH_DIMENSION: usize = 384;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: HASH_DIMENSION,
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn embed_one(text: &str, dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dimension];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let hash = fnv1a(token.as_bytes());
        let bucket = (hash % dimension as u64) as usize;
        // Sign bit from the upper half decorrelates colliding tokens.
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign;
    }
    l2_normalize(&mut vec);
    vec
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        HASH_EMBEDDER_ID
    }

    fn revision(&self) -> &str {
        HASH_EMBEDDER_REVISION
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> EmbedderResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_one(t, self.dimension)).collect())
    }
}
