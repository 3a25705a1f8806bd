pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod covers;
pub mod recommend;
pub mod search;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use bootstrap::{ProvisionContext, ProvisionPlan, StepStatus};
use config::ServiceConfig;
use recommend::Recommender;
use search::model_fetch::{fetch_model, model_dir, FetchOutcome, ModelManifest};
use search::model_manager::{load_semantic_context, EmbedderChoice};
use search::vector_index::Quantization;

pub use config::default_data_dir;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "bookrec",
    version,
    about = "Semantic book recommendation service"
)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (model, index, receipts)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision and launch the HTTP server
    Serve {
        /// Listen port (also honors PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Catalog CSV path
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Embedder backend: minilm or hash
        #[arg(long)]
        embedder: Option<String>,

        /// Re-run every provisioning step, ignoring the cache
        #[arg(long)]
        rebuild: bool,
    },
    /// Pre-materialize the embedding model (the only networked step)
    FetchModel {
        /// Replace an existing install
        #[arg(long)]
        force: bool,
    },
    /// Build or refresh the corpus vector index
    Index {
        /// Catalog CSV path
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Embedder backend: minilm or hash
        #[arg(long)]
        embedder: Option<String>,

        /// Full rebuild, ignoring the provisioning cache
        #[arg(long)]
        full: bool,

        /// Store vectors as f16 to halve the index size
        #[arg(long)]
        f16: bool,
    },
    /// One-shot recommendation from the command line
    Recommend {
        /// Free-text query
        query: String,

        /// Number of results
        #[arg(short, long, default_value_t = config::DEFAULT_K)]
        k: usize,

        /// Catalog CSV path
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Embedder backend: minilm or hash
        #[arg(long)]
        embedder: Option<String>,
    },
    /// Download cover art from Open Library and write an augmented CSV
    Covers {
        /// Catalog CSV path
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Directory covers are written under (as <dir>/covers/)
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Augmented CSV output path
        #[arg(long)]
        out: Option<PathBuf>,

        /// Pause between Open Library requests, in milliseconds
        #[arg(long, default_value_t = 250)]
        delay_ms: u64,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = ServiceConfig::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }

    match cli.command {
        Commands::Serve {
            port,
            host,
            catalog,
            embedder,
            rebuild,
        } => {
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(host) = host {
                cfg.host = host.parse().context("parse --host")?;
            }
            if let Some(catalog) = catalog {
                cfg.catalog_path = catalog;
            }
            if let Some(embedder) = embedder {
                cfg.embedder = parse_embedder(&embedder)?;
            }
            serve(cfg, rebuild)
        }
        Commands::FetchModel { force } => fetch_model_command(&cfg, force),
        Commands::Index {
            catalog,
            embedder,
            full,
            f16,
        } => {
            if let Some(catalog) = catalog {
                cfg.catalog_path = catalog;
            }
            if let Some(embedder) = embedder {
                cfg.embedder = parse_embedder(&embedder)?;
            }
            index_command(&cfg, full, f16)
        }
        Commands::Recommend {
            query,
            k,
            catalog,
            embedder,
        } => {
            if let Some(catalog) = catalog {
                cfg.catalog_path = catalog;
            }
            if let Some(embedder) = embedder {
                cfg.embedder = parse_embedder(&embedder)?;
            }
            recommend_command(&cfg, &query, k)
        }
        Commands::Covers {
            catalog,
            static_dir,
            out,
            delay_ms,
        } => covers_command(&cfg, catalog, static_dir, out, delay_ms),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "bookrec", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn parse_embedder(value: &str) -> Result<EmbedderChoice> {
    EmbedderChoice::parse(value)
        .ok_or_else(|| anyhow!("unknown embedder `{value}` (expected `minilm` or `hash`)"))
}

fn provision_context(cfg: &ServiceConfig) -> ProvisionContext {
    ProvisionContext::new(
        cfg.data_dir.clone(),
        cfg.catalog_path.clone(),
        Some(cfg.static_dir.clone()),
    )
    .with_embedder_choice(cfg.embedder)
}

fn serve(cfg: ServiceConfig, rebuild: bool) -> Result<()> {
    // Provision fully before the async runtime exists: every step is
    // blocking work, and a failed step must prevent the bind entirely.
    let mut ctx = provision_context(&cfg).with_force(rebuild);
    ProvisionPlan::standard().run(&mut ctx)?;
    let recommender = recommender_from_context(ctx)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build async runtime")?;
    runtime.block_on(server::run(&cfg, recommender))
}

fn recommender_from_context(ctx: ProvisionContext) -> Result<Recommender> {
    let catalog = ctx
        .catalog
        .ok_or_else(|| anyhow!("provisioning finished without a catalog"))?;
    let embedder = ctx
        .embedder
        .ok_or_else(|| anyhow!("provisioning finished without an embedder"))?;
    let index = ctx
        .index
        .ok_or_else(|| anyhow!("provisioning finished without an index"))?;
    Ok(Recommender::new(catalog, embedder, index))
}

fn fetch_model_command(cfg: &ServiceConfig, force: bool) -> Result<()> {
    let mut manifest = ModelManifest::minilm_l6_v2();
    if let Ok(base) = dotenvy::var("BOOKREC_MODEL_BASE_URL") {
        manifest = manifest.with_base_url(base);
    }
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("create data dir {}", cfg.data_dir.display()))?;

    match fetch_model(&cfg.data_dir, &manifest, force)? {
        FetchOutcome::AlreadyInstalled => {
            println!(
                "model already installed at {}",
                model_dir(&cfg.data_dir).display()
            );
        }
        FetchOutcome::Installed => {
            println!("model installed at {}", model_dir(&cfg.data_dir).display());
        }
    }
    Ok(())
}

fn index_command(cfg: &ServiceConfig, full: bool, f16: bool) -> Result<()> {
    let quantization = if f16 { Quantization::F16 } else { Quantization::F32 };
    let mut ctx = provision_context(cfg)
        .with_force(full)
        .with_quantization(quantization);
    let receipt = ProvisionPlan::standard().run(&mut ctx)?;

    let count = ctx.index.as_ref().map(|i| i.len()).unwrap_or(0);
    let built = receipt
        .steps
        .iter()
        .any(|s| s.name == "build-index" && s.status == StepStatus::Ran);
    if built {
        println!("indexed {count} books");
    } else {
        println!("index up to date ({count} books)");
    }
    Ok(())
}

fn recommend_command(cfg: &ServiceConfig, query: &str, k: usize) -> Result<()> {
    let setup = load_semantic_context(&cfg.data_dir, cfg.embedder);
    let Some(semantic) = setup.context else {
        bail!("{}", setup.availability.summary());
    };

    let catalog = Arc::new(catalog::load_catalog(
        &cfg.catalog_path,
        Some(&cfg.static_dir),
    ));
    let recommender = Recommender::new(catalog, semantic.embedder, semantic.index);
    let results = recommender.recommend(query, k)?;

    serde_json::to_writer_pretty(std::io::stdout(), &results)?;
    println!();
    Ok(())
}

fn covers_command(
    cfg: &ServiceConfig,
    catalog: Option<PathBuf>,
    static_dir: Option<PathBuf>,
    out: Option<PathBuf>,
    delay_ms: u64,
) -> Result<()> {
    let mut opts = covers::CoverFetchOptions {
        catalog_path: catalog.unwrap_or_else(|| cfg.catalog_path.clone()),
        static_dir: static_dir.unwrap_or_else(|| cfg.static_dir.clone()),
        delay: Duration::from_millis(delay_ms),
        ..covers::CoverFetchOptions::default()
    };
    if let Some(out) = out {
        opts.output_csv = out;
    }
    if let Ok(url) = dotenvy::var("BOOKREC_OPENLIBRARY_URL") {
        opts.search_base = url;
    }
    if let Ok(url) = dotenvy::var("BOOKREC_COVERS_URL") {
        opts.covers_base = url;
    }

    let report = covers::fetch_covers(&opts)?;
    println!(
        "covers: {} fetched, {} placeholders, {} skipped",
        report.fetched, report.placeholders, report.skipped
    );
    Ok(())
}
