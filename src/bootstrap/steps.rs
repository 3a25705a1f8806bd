//! Concrete provisioning steps.

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{ProvisionContext, ProvisionStep};
use crate::search::canonicalize::{canonicalize_for_embedding, content_hash};
use crate::search::model_fetch::{missing_model_files, model_dir, verify_installed, LOCK_FILE};
use crate::search::model_manager::{make_embedder, EmbedderChoice};
use crate::search::vector_index::{vector_index_path, VectorEntry, VectorIndex};

/// Create the working directory layout everything else writes into.
pub struct EnsureLayout;

impl ProvisionStep for EnsureLayout {
    fn name(&self) -> &'static str {
        "ensure-layout"
    }

    fn fingerprint(&self, _ctx: &mut ProvisionContext) -> Result<Option<String>> {
        // Directory creation is idempotent and cheap; always run.
        Ok(None)
    }

    fn artifact_present(&self, ctx: &ProvisionContext) -> bool {
        ctx.data_dir.is_dir()
    }

    fn run(&self, ctx: &mut ProvisionContext) -> Result<()> {
        std::fs::create_dir_all(&ctx.data_dir)
            .with_context(|| format!("create data dir {}", ctx.data_dir.display()))?;
        Ok(())
    }
}

/// Stage the catalog manifest, alone: nothing else feeds its fingerprint,
/// so edits elsewhere never invalidate it.
pub struct LoadCatalog;

impl ProvisionStep for LoadCatalog {
    fn name(&self) -> &'static str {
        "load-catalog"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["ensure-layout"]
    }

    fn fingerprint(&self, ctx: &mut ProvisionContext) -> Result<Option<String>> {
        Ok(Some(ctx.ensure_catalog().fingerprint()))
    }

    fn artifact_present(&self, ctx: &ProvisionContext) -> bool {
        ctx.catalog.is_some()
    }

    fn run(&self, ctx: &mut ProvisionContext) -> Result<()> {
        let catalog = ctx.ensure_catalog();
        if catalog.is_empty() {
            info!("catalog is empty; recommendations will be empty too");
        }
        Ok(())
    }
}

/// Check the pre-materialized embedding model and load the embedder.
///
/// This step never downloads: the model registry is a build-time dependency
/// only. A missing model is a hard failure pointing at `fetch-model`.
pub struct EnsureModel;

impl ProvisionStep for EnsureModel {
    fn name(&self) -> &'static str {
        "ensure-model"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["ensure-layout"]
    }

    fn fingerprint(&self, ctx: &mut ProvisionContext) -> Result<Option<String>> {
        match ctx.embedder_choice {
            EmbedderChoice::Hash => Ok(Some("hash".to_string())),
            EmbedderChoice::MiniLm => {
                let lock_path = model_dir(&ctx.data_dir).join(LOCK_FILE);
                match std::fs::read(&lock_path) {
                    Ok(bytes) => Ok(Some(hex::encode(Sha256::digest(&bytes)))),
                    // No lock yet: no cacheable identity, run (and fail with
                    // guidance) every time.
                    Err(_) => Ok(None),
                }
            }
        }
    }

    fn artifact_present(&self, ctx: &ProvisionContext) -> bool {
        match ctx.embedder_choice {
            EmbedderChoice::Hash => true,
            EmbedderChoice::MiniLm => {
                missing_model_files(&model_dir(&ctx.data_dir)).is_empty()
            }
        }
    }

    fn run(&self, ctx: &mut ProvisionContext) -> Result<()> {
        if ctx.embedder_choice == EmbedderChoice::MiniLm {
            let dir = model_dir(&ctx.data_dir);
            let missing = missing_model_files(&dir);
            if !missing.is_empty() {
                bail!(
                    "embedding model missing from {} ({}); run `bookrec fetch-model` first",
                    dir.display(),
                    missing.join(", ")
                );
            }
            verify_installed(&dir).context("installed model failed verification")?;
        }
        let embedder = make_embedder(&ctx.data_dir, ctx.embedder_choice)
            .map_err(|e| anyhow!("load embedder: {e}"))?;
        ctx.embedder = Some(embedder);
        Ok(())
    }
}

/// Embed the staged catalog and persist the vector index.
///
/// Requires both the catalog and the model: the plan will not let this step
/// run before either. The fingerprint covers exactly the inputs that change
/// the index — catalog content, embedder identity and revision,
/// quantization — so cover art or config edits cannot force a rebuild.
pub struct BuildIndex;

impl ProvisionStep for BuildIndex {
    fn name(&self) -> &'static str {
        "build-index"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["load-catalog", "ensure-model"]
    }

    fn fingerprint(&self, ctx: &mut ProvisionContext) -> Result<Option<String>> {
        let catalog_fp = ctx.ensure_catalog().fingerprint();
        let Some(embedder) = ctx.embedder.as_ref() else {
            // ensure-model has not populated the context yet (first pass
            // before it runs); no cacheable identity.
            return Ok(None);
        };
        Ok(Some(format!(
            "{}@{}:q{}:{}",
            embedder.id(),
            embedder.revision(),
            ctx.quantization.to_u8(),
            catalog_fp
        )))
    }

    fn artifact_present(&self, ctx: &ProvisionContext) -> bool {
        let Some(embedder) = ctx.embedder.as_ref() else {
            return false;
        };
        vector_index_path(&ctx.data_dir, embedder.id()).is_file()
    }

    fn run(&self, ctx: &mut ProvisionContext) -> Result<()> {
        let catalog = ctx.ensure_catalog();
        let embedder = ctx
            .embedder
            .as_ref()
            .ok_or_else(|| anyhow!("build-index ran without an embedder"))?
            .clone();

        let texts: Vec<String> = catalog
            .books()
            .iter()
            .map(|b| canonicalize_for_embedding(&b.embedding_text()))
            .collect();
        let vectors = embedder
            .embed(&texts)
            .map_err(|e| anyhow!("embed catalog: {e}"))?;
        if vectors.len() != catalog.len() {
            bail!(
                "embedder returned {} vectors for {} books",
                vectors.len(),
                catalog.len()
            );
        }

        let entries: Vec<VectorEntry> = catalog
            .books()
            .iter()
            .zip(texts.iter())
            .zip(vectors)
            .map(|((book, text), vector)| VectorEntry {
                book_id: book.id,
                content_hash: content_hash(text),
                vector,
            })
            .collect();

        let index = VectorIndex::build(
            embedder.id(),
            embedder.revision(),
            embedder.dimension(),
            ctx.quantization,
            entries,
        )?;
        let path = vector_index_path(&ctx.data_dir, embedder.id());
        index.save(&path)?;
        info!(
            path = %path.display(),
            books = catalog.len(),
            embedder = embedder.id(),
            "index_built"
        );
        ctx.index = Some(index);
        Ok(())
    }

    fn resume(&self, ctx: &mut ProvisionContext) -> Result<()> {
        let embedder = ctx
            .embedder
            .as_ref()
            .ok_or_else(|| anyhow!("build-index resumed without an embedder"))?;
        let path = vector_index_path(&ctx.data_dir, embedder.id());
        let index = VectorIndex::load(&path)?;
        let header = index.header();
        if header.embedder_id != embedder.id() || header.embedder_revision != embedder.revision() {
            bail!(
                "index on disk was built by {}@{}",
                header.embedder_id,
                header.embedder_revision
            );
        }
        ctx.index = Some(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{ProvisionPlan, StepStatus};
    use crate::search::vector_index::Quantization;
    use std::fs;
    use tempfile::tempdir;

    fn hash_ctx(root: &std::path::Path) -> ProvisionContext {
        ProvisionContext::new(
            root.join("data"),
            root.join("books.csv"),
            None,
        )
        .with_embedder_choice(EmbedderChoice::Hash)
        .with_quantization(Quantization::F32)
    }

    fn write_catalog(root: &std::path::Path, rows: &str) {
        fs::write(
            root.join("books.csv"),
            format!("title,author,description,genres\n{rows}"),
        )
        .unwrap();
    }

    #[test]
    fn full_plan_provisions_with_hash_embedder() {
        let tmp = tempdir().unwrap();
        write_catalog(tmp.path(), "Dune,Frank Herbert,Desert epic,Science Fiction\n");

        let mut ctx = hash_ctx(tmp.path());
        let receipt = ProvisionPlan::standard().run(&mut ctx).unwrap();

        assert!(receipt.steps.iter().all(|s| s.status == StepStatus::Ran));
        assert!(ctx.index.is_some());
        assert!(ctx.data_dir.join(super::super::RECEIPT_FILE).is_file());
    }

    #[test]
    fn second_run_skips_index_build() {
        let tmp = tempdir().unwrap();
        write_catalog(tmp.path(), "Dune,Frank Herbert,Desert epic,Science Fiction\n");

        let mut ctx = hash_ctx(tmp.path());
        ProvisionPlan::standard().run(&mut ctx).unwrap();

        let mut ctx2 = hash_ctx(tmp.path());
        let receipt = ProvisionPlan::standard().run(&mut ctx2).unwrap();
        let index_step = receipt
            .steps
            .iter()
            .find(|s| s.name == "build-index")
            .unwrap();
        assert_eq!(index_step.status, StepStatus::Skipped);
        assert!(ctx2.index.is_some());
    }

    #[test]
    fn catalog_edit_invalidates_index_cache() {
        let tmp = tempdir().unwrap();
        write_catalog(tmp.path(), "Dune,Frank Herbert,Desert epic,Science Fiction\n");

        let mut ctx = hash_ctx(tmp.path());
        ProvisionPlan::standard().run(&mut ctx).unwrap();

        write_catalog(
            tmp.path(),
            "Dune,Frank Herbert,Desert epic,Science Fiction\n1984,George Orwell,Dystopia,Dystopia\n",
        );
        let mut ctx2 = hash_ctx(tmp.path());
        let receipt = ProvisionPlan::standard().run(&mut ctx2).unwrap();
        let index_step = receipt
            .steps
            .iter()
            .find(|s| s.name == "build-index")
            .unwrap();
        assert_eq!(index_step.status, StepStatus::Ran);
        assert_eq!(ctx2.index.unwrap().len(), 2);
    }

    #[test]
    fn unrelated_files_do_not_invalidate_index_cache() {
        let tmp = tempdir().unwrap();
        write_catalog(tmp.path(), "Dune,Frank Herbert,Desert epic,Science Fiction\n");

        let mut ctx = hash_ctx(tmp.path());
        ProvisionPlan::standard().run(&mut ctx).unwrap();

        // Cover art appears between runs; the catalog did not change.
        fs::create_dir_all(tmp.path().join("data/covers")).unwrap();
        fs::write(tmp.path().join("data/covers/1.jpg"), b"jpeg").unwrap();

        let mut ctx2 = hash_ctx(tmp.path());
        let receipt = ProvisionPlan::standard().run(&mut ctx2).unwrap();
        let index_step = receipt
            .steps
            .iter()
            .find(|s| s.name == "build-index")
            .unwrap();
        assert_eq!(index_step.status, StepStatus::Skipped);
    }

    #[test]
    fn minilm_without_model_fails_with_guidance() {
        let tmp = tempdir().unwrap();
        write_catalog(tmp.path(), "Dune,Frank Herbert,Desert epic,Science Fiction\n");

        let mut ctx = ProvisionContext::new(
            tmp.path().join("data"),
            tmp.path().join("books.csv"),
            None,
        );
        let err = ProvisionPlan::standard().run(&mut ctx).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("fetch-model"), "unexpected error: {chain}");
        // Fail-fast: no receipt after a failed run.
        assert!(!tmp.path().join("data").join(super::super::RECEIPT_FILE).exists());
    }

    #[test]
    fn force_reruns_cached_steps() {
        let tmp = tempdir().unwrap();
        write_catalog(tmp.path(), "Dune,Frank Herbert,Desert epic,Science Fiction\n");

        let mut ctx = hash_ctx(tmp.path());
        ProvisionPlan::standard().run(&mut ctx).unwrap();

        let mut ctx2 = hash_ctx(tmp.path()).with_force(true);
        let receipt = ProvisionPlan::standard().run(&mut ctx2).unwrap();
        assert!(receipt.steps.iter().all(|s| s.status == StepStatus::Ran));
    }
}
