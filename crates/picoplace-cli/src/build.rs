use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use log::debug;
use picoplace_core::circuit::{CircuitError, Severity};
use picoplace_core::{Circuit, RenderConfig};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Default, Clone)]
#[command(about = "Render circuit trees from .json files")]
pub struct BuildArgs {
    /// One or more .json files or directories containing .json files (non-recursive) to build.
    /// When omitted, all .json files in the current directory are built.
    #[arg(value_name = "PATHS", value_hint = clap::ValueHint::AnyPath)]
    pub paths: Vec<PathBuf>,

    /// Where to write the rendered document. A file for a single input,
    /// otherwise a directory receiving one `<name>.circuit.json` per input.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the rendered document to stdout
    #[arg(long)]
    pub json: bool,
}

/// Read and render one tree.
pub fn render_file(path: &Path, config: &RenderConfig) -> Result<Circuit> {
    debug!("rendering {}", path.display());
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut circuit = Circuit::from_json_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?
        .with_config(config.clone());
    circuit
        .render()
        .with_context(|| format!("rendering {}", path.display()))?;
    Ok(circuit)
}

pub fn print_diagnostic(diag: &CircuitError) {
    let label = match diag.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    };
    let at = diag
        .center
        .map(|c| format!(" at ({:.2}, {:.2})", c.x, c.y))
        .unwrap_or_default();
    eprintln!("{label}[{}]{at}: {}", diag.error_type, diag.message);
}

pub fn execute(args: BuildArgs, config: &RenderConfig) -> Result<()> {
    let paths = collect_files(&args.paths)?;

    if paths.is_empty() {
        let cwd = std::env::current_dir()?;
        anyhow::bail!(
            "No .json circuit files found in {}",
            cwd.canonicalize().unwrap_or(cwd).display()
        );
    }

    let mut has_errors = false;
    let single = paths.len() == 1;

    for path in paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let circuit = match render_file(&path, config) {
            Ok(circuit) => circuit,
            Err(err) => {
                eprintln!("{} {}: {err:#}", "✗".red(), file_name.red().bold());
                has_errors = true;
                continue;
            }
        };

        let diagnostics = circuit.diagnostics();
        for diag in &diagnostics {
            print_diagnostic(diag);
        }
        let file_has_errors = diagnostics.iter().any(CircuitError::is_error);

        if args.json {
            println!("{}", serde_json::to_string_pretty(&circuit.to_json()?)?);
        }
        if let Some(target) = &args.output {
            let out = output_path(target, &path, "circuit.json", single)?;
            fs::write(&out, serde_json::to_string_pretty(&circuit.to_json()?)?)
                .with_context(|| format!("writing {}", out.display()))?;
            debug!("wrote {}", out.display());
        }

        let db = circuit.db();
        if file_has_errors {
            eprintln!("{} {}: Build failed", "✗".red(), file_name.red().bold());
            has_errors = true;
        } else {
            eprintln!(
                "{} {} ({} components, {} traces)",
                "✓".green(),
                file_name.green().bold(),
                db.source_component.len(),
                db.pcb_trace.len()
            );
        }
    }

    if has_errors {
        anyhow::bail!("Build failed with errors");
    }

    Ok(())
}

/// `target` itself for a single input, else `<target>/<stem>.<extension>`.
pub fn output_path(target: &Path, input: &Path, extension: &str, single: bool) -> Result<PathBuf> {
    if single && !target.is_dir() {
        return Ok(target.to_path_buf());
    }
    fs::create_dir_all(target).with_context(|| format!("creating {}", target.display()))?;
    let stem = input.file_stem().unwrap_or_default();
    Ok(target.join(stem).with_extension(extension))
}

fn is_tree_file(path: &Path) -> bool {
    let is_json = path.extension().is_some_and(|e| e == "json");
    let is_output = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().ends_with(".circuit.json"));
    path.is_file() && is_json && !is_output
}

/// Collect .json trees from the provided paths
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut unique: HashSet<PathBuf> = HashSet::new();

    let roots = if paths.is_empty() {
        vec![std::env::current_dir()?]
    } else {
        paths.to_vec()
    };

    for user_path in roots {
        let resolved = if user_path.is_absolute() {
            user_path
        } else {
            std::env::current_dir()?.join(user_path)
        };

        if resolved.is_file() {
            unique.insert(resolved);
        } else if resolved.is_dir() {
            for entry in fs::read_dir(resolved)?.flatten() {
                let path = entry.path();
                if is_tree_file(&path) {
                    unique.insert(path);
                }
            }
        }
    }

    // Keep deterministic ordering
    let mut paths_vec: Vec<_> = unique.into_iter().collect();
    paths_vec.sort();
    Ok(paths_vec)
}
