//! Semantic model management (local-only detection).
//!
//! Wires the embedder and the corpus index together by:
//! - validating the installed model files and their lock manifest
//! - loading the vector index
//! - detecting index/embedder mismatches
//!
//! It does **not** download models. Missing files are surfaced as
//! availability states so callers can point the operator at `fetch-model`.
//! Downloads are handled by [`super::model_fetch`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::search::embedder::{Embedder, EmbedderError, EmbedderResult};
use crate::search::fastembed_embedder::FastEmbedder;
use crate::search::hash_embedder::{HashEmbedder, HASH_EMBEDDER_ID};
use crate::search::model_fetch::{missing_model_files, verify_installed};
use crate::search::vector_index::{vector_index_path, VectorIndex};

/// Which embedder backs the index and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedderChoice {
    /// MiniLM via the pre-materialized ONNX model.
    #[default]
    MiniLm,
    /// Deterministic feature-hashing fallback; never touches model files.
    Hash,
}

impl EmbedderChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minilm" => Some(Self::MiniLm),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MiniLm => "minilm",
            Self::Hash => "hash",
        }
    }

    pub fn embedder_id(&self) -> &'static str {
        match self {
            Self::MiniLm => FastEmbedder::embedder_id_static(),
            Self::Hash => HASH_EMBEDDER_ID,
        }
    }
}

/// Lifecycle of semantic recommendation from the operator's perspective.
#[derive(Debug, Clone)]
pub enum EmbeddingAvailability {
    /// Embedder and index are loaded and agree.
    Ready { embedder_id: String },

    /// The hash fallback is active by explicit choice.
    HashFallback,

    /// Model files are missing; `fetch-model` has not run.
    ModelMissing {
        model_dir: PathBuf,
        missing_files: Vec<String>,
    },

    /// Installed files no longer match the install lock.
    ModelCorrupt { context: String },

    /// No index has been built for this embedder yet.
    IndexMissing { index_path: PathBuf },

    /// The index was built by a different embedder or revision.
    StaleIndex {
        index_embedder: String,
        index_revision: String,
        expected_embedder: String,
        expected_revision: String,
    },

    /// Something loaded but failed.
    LoadFailed { context: String },
}

impl EmbeddingAvailability {
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            EmbeddingAvailability::Ready { .. } | EmbeddingAvailability::HashFallback
        )
    }

    pub fn needs_rebuild(&self) -> bool {
        matches!(
            self,
            EmbeddingAvailability::IndexMissing { .. } | EmbeddingAvailability::StaleIndex { .. }
        )
    }

    pub fn summary(&self) -> String {
        match self {
            EmbeddingAvailability::Ready { embedder_id } => {
                format!("semantic ready ({embedder_id})")
            }
            EmbeddingAvailability::HashFallback => "hash fallback active".to_string(),
            EmbeddingAvailability::ModelMissing { model_dir, .. } => format!(
                "model missing at {} (run `bookrec fetch-model`)",
                model_dir.display()
            ),
            EmbeddingAvailability::ModelCorrupt { context } => {
                format!("model failed verification: {context}")
            }
            EmbeddingAvailability::IndexMissing { index_path } => {
                format!("vector index missing at {}", index_path.display())
            }
            EmbeddingAvailability::StaleIndex {
                index_embedder,
                index_revision,
                expected_embedder,
                expected_revision,
            } => format!(
                "index built by {index_embedder}@{index_revision}, expected \
                 {expected_embedder}@{expected_revision} (run `bookrec index`)"
            ),
            EmbeddingAvailability::LoadFailed { context } => {
                format!("semantic load failed ({context})")
            }
        }
    }
}

pub struct SemanticContext {
    pub embedder: Arc<dyn Embedder>,
    pub index: VectorIndex,
}

pub struct SemanticSetup {
    pub availability: EmbeddingAvailability,
    pub context: Option<SemanticContext>,
}

/// Instantiate an embedder without touching the index.
pub fn make_embedder(data_dir: &Path, choice: EmbedderChoice) -> EmbedderResult<Arc<dyn Embedder>> {
    match choice {
        EmbedderChoice::Hash => Ok(Arc::new(HashEmbedder::new())),
        EmbedderChoice::MiniLm => {
            let dir = FastEmbedder::default_model_dir(data_dir);
            let missing = missing_model_files(&dir);
            if !missing.is_empty() {
                return Err(EmbedderError::ModelFilesMissing { dir, missing });
            }
            verify_installed(&dir).map_err(|e| EmbedderError::LoadFailed(e.to_string()))?;
            Ok(Arc::new(FastEmbedder::load_from_dir(&dir)?))
        }
    }
}

/// Load embedder + index, reporting availability instead of failing early.
pub fn load_semantic_context(data_dir: &Path, choice: EmbedderChoice) -> SemanticSetup {
    if choice == EmbedderChoice::MiniLm {
        let model_dir = FastEmbedder::default_model_dir(data_dir);
        let missing = missing_model_files(&model_dir);
        if !missing.is_empty() {
            return SemanticSetup {
                availability: EmbeddingAvailability::ModelMissing {
                    model_dir,
                    missing_files: missing,
                },
                context: None,
            };
        }
        if let Err(err) = verify_installed(&model_dir) {
            return SemanticSetup {
                availability: EmbeddingAvailability::ModelCorrupt {
                    context: err.to_string(),
                },
                context: None,
            };
        }
    }

    let embedder = match make_embedder(data_dir, choice) {
        Ok(embedder) => embedder,
        Err(err) => {
            return SemanticSetup {
                availability: EmbeddingAvailability::LoadFailed {
                    context: format!("embedder: {err}"),
                },
                context: None,
            };
        }
    };

    let index_path = vector_index_path(data_dir, embedder.id());
    if !index_path.is_file() {
        return SemanticSetup {
            availability: EmbeddingAvailability::IndexMissing { index_path },
            context: None,
        };
    }

    let index = match VectorIndex::load(&index_path) {
        Ok(index) => index,
        Err(err) => {
            return SemanticSetup {
                availability: EmbeddingAvailability::LoadFailed {
                    context: format!("vector index: {err}"),
                },
                context: None,
            };
        }
    };

    let header = index.header();
    if header.embedder_id != embedder.id() || header.embedder_revision != embedder.revision() {
        return SemanticSetup {
            availability: EmbeddingAvailability::StaleIndex {
                index_embedder: header.embedder_id.clone(),
                index_revision: header.embedder_revision.clone(),
                expected_embedder: embedder.id().to_string(),
                expected_revision: embedder.revision().to_string(),
            },
            context: None,
        };
    }

    let availability = match choice {
        EmbedderChoice::Hash => EmbeddingAvailability::HashFallback,
        EmbedderChoice::MiniLm => EmbeddingAvailability::Ready {
            embedder_id: embedder.id().to_string(),
        },
    };

    SemanticSetup {
        availability,
        context: Some(SemanticContext { embedder, index }),
    }
}
