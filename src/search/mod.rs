//! Search layer facade.
//!
//! This module provides the embedding infrastructure for bookrec, including:
//!
//! - **[`embedder`]**: Embedder trait (hash and ML implementations).
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic fallback).
//! - **[`fastembed_embedder`]**: FastEmbed-backed ML embedder (MiniLM).
//! - **[`model_fetch`]**: Model pre-materialization with verification and atomic install.
//! - **[`model_manager`]**: Model detection + context wiring (no downloads).
//! - **[`canonicalize`]**: Text preprocessing for consistent embedding input.
//! - **[`vector_index`]**: BKVI corpus vector index (mmap-backed, top-k search).

pub mod canonicalize;
pub mod embedder;
pub mod fastembed_embedder;
pub mod hash_embedder;
pub mod model_fetch;
pub mod model_manager;
pub mod vector_index;
