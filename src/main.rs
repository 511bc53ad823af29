//! # inkmirror CLI
//!
//! ```bash
//! inkmirror --config ./config/inkmirror.toml sync <SOURCE> <OUTPUT>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `inkmirror sync <src> <out>` | Build or update the output tree |
//! | `inkmirror check-config` | Validate the configuration and report OCR status |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `warn,inkmirror=info`); the run summary goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use inkmirror::config::{self, Config};
use inkmirror::metadata::BuildFlags;
use inkmirror::ocr::{GoogleVisionClient, OcrEngine};
use inkmirror::render::CommandRenderer;
use inkmirror::sync::{self, ItemOutcome, SyncOptions, SyncReport};

/// Mirror a reMarkable notebook store into searchable PDFs.
#[derive(Parser)]
#[command(name = "inkmirror", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/inkmirror.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or incrementally update the output tree.
    Sync {
        /// Source store (flat directory of `<id>.metadata`, `<id>.content`, ...).
        source: PathBuf,

        /// Output root.
        output: PathBuf,

        /// Skip handwriting recognition.
        #[arg(long)]
        no_ocr: bool,

        /// Draw recognized text visibly, with word outlines.
        #[arg(long)]
        ocr_debug: bool,
    },

    /// Validate the configuration file.
    CheckConfig,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,inkmirror=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,inkmirror=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Sync {
            source,
            output,
            no_ocr,
            ocr_debug,
        } => {
            let api_key = cfg.resolve_api_key();
            let ocr_wanted = cfg.ocr.enabled && !no_ocr;
            let client = match (&api_key, ocr_wanted) {
                (Some(key), true) => Some(GoogleVisionClient::new(
                    &cfg.ocr.endpoint,
                    key,
                    cfg.ocr.timeout_secs,
                )?),
                (None, true) => {
                    tracing::info!("no OCR API key found, OCR disabled");
                    None
                }
                _ => None,
            };
            let flags = BuildFlags {
                ocr: client.is_some(),
                debug_overlay: cfg.overlay.debug || ocr_debug,
            };
            let options = SyncOptions {
                source: source.clone(),
                output,
                flags,
            };
            let renderer = CommandRenderer::new(cfg.render.clone());
            let ocr = client.as_ref().map(|c| c as &dyn OcrEngine);

            let report = sync::run_sync(&cfg, &options, &renderer, ocr)?;
            print_summary(&source, &report, flags);
            if !report.errors.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::CheckConfig => {
            print_config(&cli.config, &cfg);
        }
    }

    Ok(())
}

fn print_summary(source: &std::path::Path, report: &SyncReport, flags: BuildFlags) {
    println!("sync {}", source.display());
    println!("  created: {}", report.count(ItemOutcome::Created));
    println!("  modified: {}", report.count(ItemOutcome::Modified));
    println!("  unchanged: {}", report.count(ItemOutcome::Unchanged));
    println!("  renamed: {}", report.count(ItemOutcome::Renamed));
    println!("  deleted: {}", report.count(ItemOutcome::Deleted));
    println!("  skipped: {}", report.count(ItemOutcome::Skipped));
    println!("  pages rendered: {}", report.pages_rendered);
    println!("  artifacts reused: {}", report.artifacts_reused);
    if flags.ocr {
        println!("  pages recognized: {}", report.pages_recognized);
        println!("  words placed: {}", report.words_placed);
    }
    if report.errors.is_empty() {
        println!("ok");
    } else {
        println!("  errors: {}", report.errors.len());
        for e in &report.errors {
            println!("    {} ({}): {}", e.name, e.id, e.error);
        }
    }
}

fn print_config(path: &std::path::Path, cfg: &Config) {
    if path.exists() {
        println!("config {}", path.display());
    } else {
        println!("config {} (not found, using defaults)", path.display());
    }
    let ocr_status = match (cfg.ocr.enabled, cfg.resolve_api_key().is_some()) {
        (false, _) => "disabled",
        (true, true) => "enabled",
        (true, false) => "enabled, no API key found",
    };
    println!("  ocr: {}", ocr_status);
    println!("  ocr language: {}", cfg.ocr.language);
    if cfg.render.document_command.is_empty() {
        println!("  document renderer: not configured");
    } else {
        println!("  document renderer: {}", cfg.render.document_command.join(" "));
    }
    println!("  page renderer: {}", cfg.render.page_command.join(" "));
    println!("  rasterizer: {}", cfg.render.raster_command.join(" "));
    println!(
        "  thumbnails: {}x{} at {} dpi",
        cfg.thumbnails.max_width, cfg.thumbnails.max_height, cfg.thumbnails.dpi
    );
    println!("ok");
}
