use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{batch, config, producer, storage, web, Pipeline};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facematch")]
#[command(version, about = "Match uploaded faces against a gallery of known identities")]
struct Cli {
    /// Config file (defaults to the built-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every image of a gallery (one folder per identity) into a store
    Embed {
        /// Gallery root directory
        gallery: Option<PathBuf>,
        /// Output store path
        output: Option<PathBuf>,
    },
    /// Serve the upload form
    Serve {
        /// Embedding store path
        #[arg(short, long)]
        store: Option<PathBuf>,
        /// Listen address, e.g. 127.0.0.1:5000
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Print the best gallery match for every image in a directory
    Match {
        /// Directory of unknown images
        #[arg(default_value = "dataset/Unknown")]
        unknown: PathBuf,
        /// Embedding store path
        #[arg(short, long)]
        store: Option<PathBuf>,
    },
    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Embed { gallery, output } => {
            let gallery = gallery.unwrap_or_else(|| cfg.gallery_dir.clone());
            let output = output.unwrap_or_else(|| cfg.store_path.clone());
            embed(&cfg, &gallery, &output)
        }
        Commands::Serve { store, listen } => {
            let store = store.unwrap_or_else(|| cfg.store_path.clone());
            let listen = listen.unwrap_or_else(|| cfg.listen.clone());
            serve(&cfg, &store, &listen)
        }
        Commands::Match { unknown, store } => {
            let store = store.unwrap_or_else(|| cfg.store_path.clone());
            match_unknown(&cfg, &unknown, &store)
        }
        Commands::InitConfig { force } => init_config(&cfg, cli.config.as_deref(), force),
    }
}

fn pipeline(cfg: &config::Config) -> Result<Pipeline> {
    Pipeline::new(
        &cfg.model.detector,
        &cfg.model.encoder,
        cfg.model.score_threshold,
        cfg.model.nms_threshold,
    )
    .context("Failed to initialize face recognition pipeline")
}

fn embed(cfg: &config::Config, gallery: &Path, output: &Path) -> Result<()> {
    let mut pipeline = pipeline(cfg)?;
    let report = producer::run(&mut pipeline, gallery, output)?;

    if !report.skipped.is_empty() {
        warn!("{} image(s) skipped:", report.skipped.len());
        for skip in &report.skipped {
            warn!("  {} ({}): {}", skip.source_ref, skip.identity, skip.reason);
        }
    }
    info!("✓ Gallery embedded: {} record(s)", report.records.len());
    Ok(())
}

fn serve(cfg: &config::Config, store_path: &Path, listen: &str) -> Result<()> {
    let store = storage::open(store_path, cfg.missing_store)
        .with_context(|| format!("Failed to open embedding store {}", store_path.display()))?;
    let pipeline = pipeline(cfg)?;
    let state = web::AppState::new(store, pipeline, cfg);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(web::serve(state, listen))
}

fn match_unknown(cfg: &config::Config, unknown: &Path, store_path: &Path) -> Result<()> {
    let store = storage::load(store_path)
        .with_context(|| format!("Failed to load embedding store {}", store_path.display()))?;
    info!("Loaded {} known face embeddings", store.len());

    let mut pipeline = pipeline(cfg)?;
    for line in batch::match_directory(&mut pipeline, &store, unknown)? {
        println!("{}", line);
    }
    Ok(())
}

fn init_config(cfg: &config::Config, path: Option<&Path>, force: bool) -> Result<()> {
    let target = path.unwrap_or(&config::CONFIG_PATH);
    if target.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            target.display()
        );
    }
    config::save_config(cfg, Some(target))?;
    info!("✓ Wrote config to {}", target.display());
    Ok(())
}
