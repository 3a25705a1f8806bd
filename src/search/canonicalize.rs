//! Text canonicalization for consistent embedding input.
//!
//! The same visual text must always produce the same canonical form, which
//! in turn produces the same content hash; the provisioning cache and the
//! index's per-row hashes both depend on it.
//!
//! Pipeline:
//!
//! 1. Unicode NFC normalization ("café" decomposed → composed)
//! 2. Whitespace normalization (collapse runs, trim)
//! 3. Truncation to [`MAX_EMBED_CHARS`]

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Maximum characters to keep after canonicalization. Catalog blurbs are a
/// sentence or two; queries are shorter still.
pub const MAX_EMBED_CHARS: usize = 512;

/// Canonicalize text for embedding. Deterministic: equal visual input yields
/// equal output.
pub fn canonicalize_for_embedding(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    let collapsed = normalize_whitespace(&normalized);
    truncate_to_chars(&collapsed, MAX_EMBED_CHARS)
}

/// SHA-256 of the UTF-8 bytes. Canonicalize first for stable hashing.
pub fn content_hash(text: &str) -> [u8; 32] {
    let digest = Sha256::digest(text.as_bytes());
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

/// Hex-encoded [`content_hash`].
pub fn content_hash_hex(text: &str) -> String {
    hex::encode(content_hash(text))
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_ws = true;
        } else {
            if in_ws && !out.is_empty() {
                out.push(' ');
            }
            in_ws = false;
            out.push(ch);
        }
    }
    out
}

fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(
            canonicalize_for_embedding("  hard   sci-fi\n\twith humor  "),
            "hard sci-fi with humor"
        );
    }

    #[test]
    fn nfc_normalization_makes_hashes_agree() {
        // "é" composed vs "e" + combining acute
        let composed = "caf\u{e9}";
        let decomposed = "cafe\u{301}";
        assert_eq!(
            content_hash(&canonicalize_for_embedding(composed)),
            content_hash(&canonicalize_for_embedding(decomposed))
        );
    }

    #[test]
    fn truncates_on_char_boundaries() {
        let long: String = "ß".repeat(MAX_EMBED_CHARS + 10);
        let out = canonicalize_for_embedding(&long);
        assert_eq!(out.chars().count(), MAX_EMBED_CHARS);
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(content_hash_hex("dune"), content_hash_hex("dune"));
        assert_ne!(content_hash_hex("dune"), content_hash_hex("dune "));
    }
}
