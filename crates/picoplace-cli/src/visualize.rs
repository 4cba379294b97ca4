use anyhow::Result;
use clap::Args;
use colored::Colorize;
use picoplace_core::RenderConfig;
use picoplace_engine::svg_generator;
use std::path::PathBuf;

use crate::build::{collect_files, output_path, print_diagnostic, render_file};

#[derive(Args, Debug, Default, Clone)]
#[command(about = "Draw rendered boards as SVG")]
pub struct VisualizeArgs {
    /// One or more .json trees to draw.
    /// When omitted, all .json files in the current directory are processed.
    #[arg(value_name = "PATHS", value_hint = clap::ValueHint::AnyPath)]
    pub paths: Vec<PathBuf>,

    /// SVG file for a single input, otherwise a directory; defaults to next
    /// to each input
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

pub fn execute(args: VisualizeArgs, config: &RenderConfig) -> Result<()> {
    let paths = collect_files(&args.paths)?;
    if paths.is_empty() {
        anyhow::bail!("No .json circuit files to visualize");
    }

    let single = paths.len() == 1;
    for path in paths {
        let circuit = render_file(&path, config)?;
        for diag in circuit.diagnostics() {
            print_diagnostic(&diag);
        }

        let svg_path = match &args.output {
            Some(target) => output_path(target, &path, "svg", single)?,
            None => path.with_extension("svg"),
        };
        svg_generator::run(circuit.db(), &svg_path)?;
        eprintln!("{} {}", "✓".green(), svg_path.display().to_string().bold());
    }

    Ok(())
}
