//! Service configuration.
//!
//! Precedence, lowest to highest: built-in defaults, optional TOML config
//! file, environment (`PORT` plus `BOOKREC_*`), CLI flags. The environment
//! layer follows the usual parse-guarded pattern: an unparsable value is
//! ignored rather than fatal.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::search::model_manager::EmbedderChoice;

/// Default listen port, matching the declared service contract.
pub const DEFAULT_PORT: u16 = 8000;

/// Default number of recommendations per request.
pub const DEFAULT_K: usize = 5;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind address; the service listens on all interfaces by default.
    pub host: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    /// Cover art root; served under `/static` when present.
    pub static_dir: PathBuf,
    pub embedder: EmbedderChoice,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            catalog_path: PathBuf::from("books.csv"),
            static_dir: PathBuf::from("static"),
            embedder: EmbedderChoice::default(),
        }
    }
}

/// Optional config-file shape; every field falls back to the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub embedder: Option<String>,
}

impl ServiceConfig {
    /// Defaults + optional file + environment.
    pub fn resolve(config_file: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(path) = config_file {
            cfg.apply_file(&FileConfig::load(path)?)?;
        }
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_file(&mut self, file: &FileConfig) -> Result<()> {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(data_dir) = &file.data_dir {
            self.data_dir = data_dir.clone();
        }
        if let Some(catalog) = &file.catalog {
            self.catalog_path = catalog.clone();
        }
        if let Some(static_dir) = &file.static_dir {
            self.static_dir = static_dir.clone();
        }
        if let Some(embedder) = &file.embedder {
            self.embedder = EmbedderChoice::parse(embedder)
                .with_context(|| format!("unknown embedder in config file: {embedder}"))?;
        }
        Ok(())
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(val) = dotenvy::var("PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = dotenvy::var("BOOKREC_HOST") {
            if let Ok(host) = val.parse() {
                self.host = host;
            }
        }
        if let Ok(val) = dotenvy::var("BOOKREC_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = dotenvy::var("BOOKREC_CATALOG") {
            self.catalog_path = PathBuf::from(val);
        }
        if let Ok(val) = dotenvy::var("BOOKREC_STATIC_DIR") {
            self.static_dir = PathBuf::from(val);
        }
        if let Ok(val) = dotenvy::var("BOOKREC_EMBEDDER") {
            if let Some(choice) = EmbedderChoice::parse(&val) {
                self.embedder = choice;
            }
        }
    }

    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.host, self.port)
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config file {}", path.display()))
    }
}

/// Platform data directory for the service.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "bookrec", "bookrec")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bookrec"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_match_service_contract() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.host.to_string(), "0.0.0.0");
        assert_eq!(cfg.catalog_path, PathBuf::from("books.csv"));
    }

    #[test]
    fn file_config_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bookrec.toml");
        std::fs::write(
            &path,
            "port = 9001\ncatalog = \"shelf.csv\"\nembedder = \"hash\"\n",
        )
        .unwrap();

        let mut cfg = ServiceConfig::default();
        cfg.apply_file(&FileConfig::load(&path).unwrap()).unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.catalog_path, PathBuf::from("shelf.csv"));
        assert_eq!(cfg.embedder, EmbedderChoice::Hash);
    }

    #[test]
    fn bad_embedder_in_file_is_an_error() {
        let mut cfg = ServiceConfig::default();
        let file = FileConfig {
            embedder: Some("bert".into()),
            ..FileConfig::default()
        };
        assert!(cfg.apply_file(&file).is_err());
    }

    #[test]
    #[serial]
    fn port_env_overrides() {
        std::env::set_var("PORT", "8080");
        let mut cfg = ServiceConfig::default();
        cfg.apply_env();
        std::env::remove_var("PORT");
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    #[serial]
    fn unparsable_port_env_is_ignored() {
        std::env::set_var("PORT", "not-a-port");
        let mut cfg = ServiceConfig::default();
        cfg.apply_env();
        std::env::remove_var("PORT");
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
