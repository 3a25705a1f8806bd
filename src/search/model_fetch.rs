//! Embedding model pre-materialization.
//!
//! The MiniLM ONNX export is fetched **once**, ahead of serving, by the
//! `fetch-model` command; `serve` and `index` only ever read the installed
//! files. The install is atomic: files are downloaded into a staging
//! directory next to the final location, hashed as they stream, and renamed
//! into place only after every file arrived intact. A failed download leaves
//! no partial model behind.
//!
//! Upstream does not publish stable digests for this export, so the install
//! records each file's SHA-256 in `model.lock.json`; [`verify_installed`]
//! re-checks the on-disk files against that lock, making any later
//! corruption or deletion a hard, deterministic failure.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Files required to load any ONNX-based embedder.
pub const REQUIRED_MODEL_FILES: &[&str] = &[
    "model.onnx",
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

pub const MODELS_DIR: &str = "models";
pub const MODEL_DIR_NAME: &str = "all-MiniLM-L6-v2";
pub const LOCK_FILE: &str = "model.lock.json";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const COPY_BUF_BYTES: usize = 64 * 1024;

/// One file in the model distribution.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub name: &'static str,
    /// Pinned digest, verified when present.
    pub sha256: Option<&'static str>,
}

/// Where a model comes from and what it consists of.
#[derive(Debug, Clone)]
pub struct ModelManifest {
    pub name: &'static str,
    pub revision: &'static str,
    /// Base URL the file names are joined onto.
    pub base_url: String,
    pub files: Vec<ModelFile>,
}

impl ModelManifest {
    /// The default sentence embedder: MiniLM-L6-v2, ONNX export.
    pub fn minilm_l6_v2() -> Self {
        Self {
            name: MODEL_DIR_NAME,
            revision: "main",
            base_url: "https://huggingface.co/Qdrant/all-MiniLM-L6-v2-onnx/resolve/main"
                .to_string(),
            files: REQUIRED_MODEL_FILES
                .iter()
                .map(|name| ModelFile {
                    name,
                    sha256: None,
                })
                .collect(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}

/// Model directory under the data dir.
pub fn model_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(MODELS_DIR).join(MODEL_DIR_NAME)
}

/// Names from [`REQUIRED_MODEL_FILES`] not present in `dir`.
pub fn missing_model_files(dir: &Path) -> Vec<String> {
    REQUIRED_MODEL_FILES
        .iter()
        .filter(|name| !dir.join(*name).is_file())
        .map(|name| (*name).to_string())
        .collect()
}

/// Digest record written at install time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockManifest {
    pub model: String,
    pub revision: String,
    pub files: BTreeMap<String, LockedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedFile {
    pub sha256: String,
    pub size_bytes: u64,
}

impl LockManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read model lock {}", path.display()))?;
        serde_json::from_str(&raw).context("parse model lock")
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize model lock")?;
        std::fs::write(dir.join(LOCK_FILE), raw).context("write model lock")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Files were already present and verified; nothing downloaded.
    AlreadyInstalled,
    /// Model downloaded and installed.
    Installed,
}

/// Pre-materialize the model described by `manifest` under `data_dir`.
///
/// With `force`, an existing install is replaced. Without it, a present and
/// verified install short-circuits — re-running the step is free, which is
/// what lets provisioning treat it as cached.
pub fn fetch_model(data_dir: &Path, manifest: &ModelManifest, force: bool) -> Result<FetchOutcome> {
    let final_dir = model_dir(data_dir);

    if !force && missing_model_files(&final_dir).is_empty() {
        match verify_installed(&final_dir) {
            Ok(()) => {
                info!(dir = %final_dir.display(), "model_already_installed");
                return Ok(FetchOutcome::AlreadyInstalled);
            }
            Err(err) => {
                warn!(error = %err, "installed model failed verification, refetching");
            }
        }
    }

    let models_root = data_dir.join(MODELS_DIR);
    std::fs::create_dir_all(&models_root)
        .with_context(|| format!("create models dir {}", models_root.display()))?;

    // Stage in a sibling directory so the final rename stays on one filesystem.
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(&models_root)
        .context("create staging dir")?;

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("build http client")?;

    let mut locked = BTreeMap::new();
    for file in &manifest.files {
        let url = manifest.file_url(file.name);
        let dest = staging.path().join(file.name);
        let (sha256, size_bytes) = download_file(&client, &url, &dest)
            .with_context(|| format!("download {url}"))?;

        if let Some(expected) = file.sha256 {
            if !sha256.eq_ignore_ascii_case(expected) {
                bail!(
                    "digest mismatch for {}: expected {expected}, got {sha256}",
                    file.name
                );
            }
        }
        locked.insert(file.name.to_string(), LockedFile { sha256, size_bytes });
    }

    let lock = LockManifest {
        model: manifest.name.to_string(),
        revision: manifest.revision.to_string(),
        files: locked,
    };
    lock.save(staging.path())?;

    if final_dir.exists() {
        std::fs::remove_dir_all(&final_dir)
            .with_context(|| format!("remove previous model dir {}", final_dir.display()))?;
    }
    let staged = staging.keep();
    std::fs::rename(&staged, &final_dir).with_context(|| {
        format!(
            "install model from {} to {}",
            staged.display(),
            final_dir.display()
        )
    })?;

    info!(dir = %final_dir.display(), model = manifest.name, "model_installed");
    Ok(FetchOutcome::Installed)
}

/// Verify the installed model against its lock manifest.
///
/// Fails when the lock is absent, a locked file is missing, or any digest
/// differs from the recorded one.
pub fn verify_installed(dir: &Path) -> Result<()> {
    let lock = LockManifest::load(dir)?;
    for (name, locked) in &lock.files {
        let path = dir.join(name);
        let (sha256, size_bytes) =
            hash_file(&path).with_context(|| format!("hash model file {}", path.display()))?;
        if size_bytes != locked.size_bytes {
            bail!(
                "model file {name} size changed (expected {}, got {size_bytes})",
                locked.size_bytes
            );
        }
        if !sha256.eq_ignore_ascii_case(&locked.sha256) {
            bail!("model file {name} digest mismatch");
        }
    }
    Ok(())
}

fn download_file(
    client: &reqwest::blocking::Client,
    url: &str,
    dest: &Path,
) -> Result<(String, u64)> {
    let mut response = client.get(url).send()?.error_for_status()?;
    let total = response.content_length();

    let bar = match total {
        Some(len) => ProgressBar::new(len).with_style(
            ProgressStyle::with_template("{msg:<24} {bytes:>10}/{total_bytes:<10} [{bar:30}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        ),
        None => ProgressBar::new_spinner(),
    };
    bar.set_message(
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );

    let mut out = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_BYTES];
    let mut written: u64 = 0;
    loop {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        written += n as u64;
        bar.set_position(written);
    }
    out.sync_all().context("fsync downloaded file")?;
    bar.finish_and_clear();

    if let Some(expected) = total {
        if written != expected {
            bail!("short read: expected {expected} bytes, got {written}");
        }
    }

    Ok((hex::encode(hasher.finalize()), written))
}

fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_BYTES];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}
