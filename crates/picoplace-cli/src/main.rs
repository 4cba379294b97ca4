use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use picoplace_core::RenderConfig;

mod build;
mod visualize;

/// Looked up in the current directory when `--config` is not given.
const DEFAULT_CONFIG: &str = "picoplace.toml";

#[derive(Parser)]
#[command(name = "picoplace")]
#[command(about = "Render circuit trees into routed boards and diagrams", long_about = None)]
struct Cli {
    /// Render settings (TOML). Defaults to ./picoplace.toml when present.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render circuit trees and report their diagnostics
    #[command(alias = "b")]
    Build(build::BuildArgs),

    /// Render a circuit tree and draw its board as SVG
    #[command(alias = "v")]
    Visualize(visualize::VisualizeArgs),
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<RenderConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG);
            if !fallback.is_file() {
                debug!("no {DEFAULT_CONFIG}, using default settings");
                return Ok(RenderConfig::default());
            }
            fallback
        }
    };
    debug!("reading settings from {}", path.display());
    RenderConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build(args) => build::execute(args, &config),
        Commands::Visualize(args) => visualize::execute(args, &config),
    }
}
