//! FastEmbed-backed ML embedder (MiniLM).
//!
//! Loads the pre-materialized ONNX export from local files only — the
//! network is `fetch-model`'s business. The reported revision is derived
//! from the installed weights' digest, so an index built against one set of
//! weights is invalidated by installing another.

use std::path::{Path, PathBuf};

use fastembed::{
    InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};
use parking_lot::Mutex;

use crate::search::embedder::{l2_normalize, Embedder, EmbedderError, EmbedderResult};
use crate::search::model_fetch::{missing_model_files, model_dir, LockManifest};

pub const MINILM_EMBEDDER_ID: &str = "minilm-384";
pub const MINILM_DIMENSION: usize = 384;

pub struct FastEmbedder {
    inner: Mutex<TextEmbedding>,
    revision: String,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl FastEmbedder {
    pub fn embedder_id_static() -> &'static str {
        MINILM_EMBEDDER_ID
    }

    /// Model directory for the default MiniLM model.
    pub fn default_model_dir(data_dir: &Path) -> PathBuf {
        model_dir(data_dir)
    }

    /// Load the embedder from an installed model directory.
    pub fn load_from_dir(dir: &Path) -> EmbedderResult<Self> {
        let missing = missing_model_files(dir);
        if !missing.is_empty() {
            return Err(EmbedderError::ModelFilesMissing {
                dir: dir.to_path_buf(),
                missing,
            });
        }

        let read = |name: &str| -> EmbedderResult<Vec<u8>> {
            std::fs::read(dir.join(name))
                .map_err(|e| EmbedderError::LoadFailed(format!("read {name}: {e}")))
        };

        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read("tokenizer.json")?,
            config_file: read("config.json")?,
            special_tokens_map_file: read("special_tokens_map.json")?,
            tokenizer_config_file: read("tokenizer_config.json")?,
        };
        let model = UserDefinedEmbeddingModel::new(read("model.onnx")?, tokenizer_files)
            .with_pooling(Pooling::Mean);

        let inner =
            TextEmbedding::try_new_from_user_defined(model, InitOptionsUserDefined::default())
                .map_err(|e| EmbedderError::LoadFailed(e.to_string()))?;

        // Weights digest (from the install lock) doubles as the revision
        // recorded in index headers.
        let revision = LockManifest::load(dir)
            .ok()
            .and_then(|lock| {
                lock.files
                    .get("model.onnx")
                    .map(|f| f.sha256.chars().take(12).collect::<String>())
            })
            .unwrap_or_else(|| "unlocked".to_string());

        Ok(Self {
            inner: Mutex::new(inner),
            revision,
        })
    }
}

impl Embedder for FastEmbedder {
    fn id(&self) -> &str {
        MINILM_EMBEDDER_ID
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn embed(&self, texts: &[String]) -> EmbedderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut embeddings = self
            .inner
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedderError::Inference(e.to_string()))?;

        for vec in &mut embeddings {
            if vec.len() != MINILM_DIMENSION {
                return Err(EmbedderError::DimensionMismatch {
                    expected: MINILM_DIMENSION,
                    got: vec.len(),
                });
            }
            l2_normalize(vec);
        }
        Ok(embeddings)
    }
}
