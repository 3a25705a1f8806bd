//! Startup provisioning pipeline.
//!
//! Producing a servable unit takes an ordered sequence of steps: lay out the
//! data directory, stage the catalog, check the pre-materialized model,
//! build the corpus index. The pipeline runs them strictly sequentially and
//! fail-fast — any step error aborts the run and no receipt is written, so a
//! partial run is never mistaken for a provisioned service.
//!
//! Two invariants are enforced structurally:
//!
//! - **Ordering**: steps declare prerequisites by name and
//!   [`ProvisionPlan::validate`] rejects any plan where a step precedes one
//!   of its prerequisites.
//! - **Caching**: each step exposes a content fingerprint of its inputs.
//!   When the fingerprint matches the previous successful run's receipt and
//!   the step's artifact is still on disk, the step is resumed from the
//!   artifact instead of re-run. Inputs that don't feed a step's fingerprint
//!   cannot invalidate it.

pub mod steps;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::search::embedder::Embedder;
use crate::search::model_manager::EmbedderChoice;
use crate::search::vector_index::{Quantization, VectorIndex};

pub const RECEIPT_FILE: &str = "provision.json";

/// Inputs and accumulated outputs of a provisioning run.
pub struct ProvisionContext {
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub embedder_choice: EmbedderChoice,
    pub quantization: Quantization,
    /// Ignore the cache and re-run every step.
    pub force: bool,

    pub catalog: Option<Arc<Catalog>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub index: Option<VectorIndex>,
}

impl ProvisionContext {
    pub fn new(data_dir: PathBuf, catalog_path: PathBuf, static_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            catalog_path,
            static_dir,
            embedder_choice: EmbedderChoice::default(),
            quantization: Quantization::F32,
            force: false,
            catalog: None,
            embedder: None,
            index: None,
        }
    }

    pub fn with_embedder_choice(mut self, choice: EmbedderChoice) -> Self {
        self.embedder_choice = choice;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    /// Stage the catalog if it has not been staged yet.
    pub fn ensure_catalog(&mut self) -> Arc<Catalog> {
        if let Some(catalog) = &self.catalog {
            return Arc::clone(catalog);
        }
        let catalog = Arc::new(crate::catalog::load_catalog(
            &self.catalog_path,
            self.static_dir.as_deref(),
        ));
        self.catalog = Some(Arc::clone(&catalog));
        catalog
    }
}

/// One provisioning step.
///
/// `run` does the work; `resume` rehydrates outputs from an existing
/// artifact when the step is cache-valid. A failed `resume` falls back to
/// `run` (a corrupt cache is re-provisioned, not fatal); a failed `run`
/// aborts the plan.
pub trait ProvisionStep {
    fn name(&self) -> &'static str;

    /// Names of steps that must have completed earlier in the plan.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    /// Content fingerprint of this step's inputs. `None` means the step has
    /// no cacheable identity and always runs.
    fn fingerprint(&self, ctx: &mut ProvisionContext) -> Result<Option<String>>;

    /// Whether the step's on-disk artifact exists.
    fn artifact_present(&self, ctx: &ProvisionContext) -> bool;

    fn run(&self, ctx: &mut ProvisionContext) -> Result<()>;

    fn resume(&self, ctx: &mut ProvisionContext) -> Result<()> {
        self.run(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ran,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReceipt {
    pub name: String,
    pub fingerprint: Option<String>,
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

/// Record of the last fully-successful provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReceipt {
    pub completed_at: DateTime<Utc>,
    pub steps: Vec<StepReceipt>,
}

impl ProvisionReceipt {
    pub fn load(data_dir: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(data_dir.join(RECEIPT_FILE)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize provision receipt")?;
        let path = data_dir.join(RECEIPT_FILE);
        let tmp = data_dir.join(format!("{RECEIPT_FILE}.tmp"));
        std::fs::write(&tmp, raw).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("rename {}", path.display()))?;
        Ok(())
    }

    pub fn fingerprint_for(&self, name: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.fingerprint.as_deref())
    }
}

pub struct ProvisionPlan {
    steps: Vec<Box<dyn ProvisionStep>>,
}

impl ProvisionPlan {
    pub fn new(steps: Vec<Box<dyn ProvisionStep>>) -> Self {
        Self { steps }
    }

    /// The serve/index plan: layout → catalog → model → index.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(steps::EnsureLayout),
            Box::new(steps::LoadCatalog),
            Box::new(steps::EnsureModel),
            Box::new(steps::BuildIndex),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Reject duplicate step names and prerequisite-order violations.
    pub fn validate(&self) -> Result<()> {
        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            if seen.contains(&step.name()) {
                bail!("duplicate provisioning step: {}", step.name());
            }
            for req in step.requires() {
                if !seen.contains(req) {
                    bail!(
                        "provisioning step `{}` requires `{req}` to run first",
                        step.name()
                    );
                }
            }
            seen.push(step.name());
        }
        Ok(())
    }

    /// Run the plan sequentially, fail-fast. The receipt is written only
    /// when every step completed.
    pub fn run(&self, ctx: &mut ProvisionContext) -> Result<ProvisionReceipt> {
        self.validate()?;

        let previous = ProvisionReceipt::load(&ctx.data_dir);
        let mut step_receipts = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let started = Instant::now();
            let fingerprint = step
                .fingerprint(ctx)
                .with_context(|| format!("fingerprint step `{}`", step.name()))?;

            let cache_valid = !ctx.force
                && fingerprint.is_some()
                && previous
                    .as_ref()
                    .and_then(|r| r.fingerprint_for(step.name()))
                    == fingerprint.as_deref()
                && step.artifact_present(ctx);

            let status = if cache_valid {
                match step.resume(ctx) {
                    Ok(()) => StepStatus::Skipped,
                    Err(err) => {
                        warn!(
                            step = step.name(),
                            error = %err,
                            "cached artifact unusable, re-running step"
                        );
                        step.run(ctx)
                            .with_context(|| format!("provisioning step `{}`", step.name()))?;
                        StepStatus::Ran
                    }
                }
            } else {
                step.run(ctx)
                    .with_context(|| format!("provisioning step `{}`", step.name()))?;
                StepStatus::Ran
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                step = step.name(),
                status = ?status,
                elapsed_ms,
                "provision_step"
            );
            step_receipts.push(StepReceipt {
                name: step.name().to_string(),
                fingerprint,
                status,
                elapsed_ms,
            });
        }

        let receipt = ProvisionReceipt {
            completed_at: Utc::now(),
            steps: step_receipts,
        };
        receipt.save(&ctx.data_dir)?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FakeStep {
        name: &'static str,
        requires: &'static [&'static str],
    }

    impl ProvisionStep for FakeStep {
        fn name(&self) -> &'static str {
            self.name
        }
        fn requires(&self) -> &'static [&'static str] {
            self.requires
        }
        fn fingerprint(&self, _ctx: &mut ProvisionContext) -> Result<Option<String>> {
            Ok(None)
        }
        fn artifact_present(&self, _ctx: &ProvisionContext) -> bool {
            false
        }
        fn run(&self, _ctx: &mut ProvisionContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn validate_rejects_step_before_its_prerequisite() {
        let plan = ProvisionPlan::new(vec![
            Box::new(FakeStep {
                name: "build-index",
                requires: &["ensure-model"],
            }),
            Box::new(FakeStep {
                name: "ensure-model",
                requires: &[],
            }),
        ]);
        let err = plan.validate().unwrap_err().to_string();
        assert!(err.contains("build-index"));
        assert!(err.contains("ensure-model"));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let plan = ProvisionPlan::new(vec![
            Box::new(FakeStep {
                name: "a",
                requires: &[],
            }),
            Box::new(FakeStep {
                name: "a",
                requires: &[],
            }),
        ]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn standard_plan_validates_and_orders_index_last() {
        let plan = ProvisionPlan::standard();
        plan.validate().unwrap();
        assert_eq!(
            plan.step_names(),
            vec!["ensure-layout", "load-catalog", "ensure-model", "build-index"]
        );
    }

    #[test]
    fn receipt_roundtrips() {
        let tmp = tempdir().unwrap();
        let receipt = ProvisionReceipt {
            completed_at: Utc::now(),
            steps: vec![StepReceipt {
                name: "load-catalog".into(),
                fingerprint: Some("abc".into()),
                status: StepStatus::Ran,
                elapsed_ms: 3,
            }],
        };
        receipt.save(tmp.path()).unwrap();
        let loaded = ProvisionReceipt::load(tmp.path()).unwrap();
        assert_eq!(loaded.fingerprint_for("load-catalog"), Some("abc"));
        assert!(loaded.fingerprint_for("missing").is_none());
    }
}
