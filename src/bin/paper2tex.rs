//! CLI binary for paper2tex.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EngineConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paper2tex::{compile, CompileRequest, EngineConfig, Paper2TexError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compile a LaTeX source to PDF next to it
  paper2tex main.tex

  # Explicit output path
  paper2tex main.tex -o camera-ready.pdf

  # Full structured request (bibliography + image references) as JSON
  paper2tex --request job.json -o paper.pdf

  # Draft build: two passes, keep auxiliary files for inspection
  paper2tex --draft --keep-aux main.tex

  # Use xelatex with a longer per-pass timeout
  paper2tex --engine xelatex --pass-timeout 600 thesis.tex

  # Print the structured result (diagnostics, stats, base64 PDF) as JSON
  paper2tex --json main.tex > result.json

REQUEST FILE FORMAT (--request):
  {
    "content":  "\\documentclass{article}...",
    "filename": "main.tex",
    "bibliography":    { "content": "@article{...}", "filename": "references.bib" },
    "imageReferences": { "fig1": { "url": "https://...", "filename": "fig1.png" } }
  }

ENVIRONMENT VARIABLES:
  PAPER2TEX_ENGINE        LaTeX engine executable (default: pdflatex)
  PAPER2TEX_BIBTEX        Bibliography processor (default: bibtex)
  PAPER2TEX_SECRET        Shared secret sent with the request
  PAPER2TEX_SCRATCH_DIR   Root for per-job scratch directories

EXIT CODES:
  0  artifact produced (possibly with warnings; see stderr)
  1  hard failure: no artifact, bad input, or unauthorized
"#;

/// Compile LaTeX sources and structured compile requests to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "paper2tex",
    version,
    about = "Compile LaTeX sources and structured compile requests to PDF",
    long_about = "Drive an external LaTeX engine through the multi-pass compile pipeline: \
isolated scratch directory, 2-3 typesetting passes plus bibtex, log parsing into structured \
diagnostics, and artifact-presence success semantics (a non-zero engine exit with a usable \
PDF is a warning, not a failure).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// LaTeX source file (.tex). Mutually exclusive with --request.
    input: Option<PathBuf>,

    /// JSON compile request file instead of a bare .tex source.
    #[arg(long, conflicts_with = "input")]
    request: Option<PathBuf>,

    /// Write the PDF to this path instead of next to the input.
    #[arg(short, long, env = "PAPER2TEX_OUTPUT")]
    output: Option<PathBuf>,

    /// LaTeX engine executable.
    #[arg(long, env = "PAPER2TEX_ENGINE", default_value = "pdflatex")]
    engine: String,

    /// Bibliography processor executable.
    #[arg(long, env = "PAPER2TEX_BIBTEX", default_value = "bibtex")]
    bibtex: String,

    /// Per-pass wall-clock timeout in seconds.
    #[arg(long, env = "PAPER2TEX_PASS_TIMEOUT", default_value_t = 300)]
    pass_timeout: u64,

    /// Draft mode: skip the third full-resolution pass.
    #[arg(long, env = "PAPER2TEX_DRAFT")]
    draft: bool,

    /// Keep auxiliary files (.aux, .log, .bbl) in the scratch directory.
    #[arg(long, env = "PAPER2TEX_KEEP_AUX")]
    keep_aux: bool,

    /// Root directory for per-job scratch directories.
    #[arg(long, env = "PAPER2TEX_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Shared secret sent with the request (checked when the config has one).
    #[arg(long, env = "PAPER2TEX_SECRET")]
    secret: Option<String>,

    /// Output the structured CompileOutput as JSON on stdout.
    #[arg(long, env = "PAPER2TEX_JSON")]
    json: bool,

    /// Print the full engine transcript even on success.
    #[arg(long)]
    transcript: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PAPER2TEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAPER2TEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAPER2TEX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; suppress INFO-level
    // library logs unless the user asked for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Load the request ─────────────────────────────────────────────────
    let (request, input_label) = load_request(&cli).await?;

    // ── Build config ─────────────────────────────────────────────────────
    let mut builder = EngineConfig::builder()
        .latex_command(&cli.engine)
        .bibliography_command(&cli.bibtex)
        .pass_timeout_secs(cli.pass_timeout)
        .full_resolution(!cli.draft)
        .keep_aux(cli.keep_aux);
    if let Some(ref root) = cli.scratch_dir {
        builder = builder.scratch_root(root.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Run the compile ──────────────────────────────────────────────────
    let spinner = if show_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Compiling");
        bar.set_message(input_label.clone());
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let result = compile(request, cli.secret.as_deref(), &config).await;

    if let Some(ref bar) = spinner {
        bar.finish_and_clear();
    }

    let output = match result {
        Ok(output) => output,
        Err(Paper2TexError::CompilationFailed {
            transcript,
            diagnostics,
        }) => {
            eprintln!("{} {}", red("✘"), bold("Compilation failed, no PDF produced"));
            for diag in diagnostics.iter().take(10) {
                eprintln!("  {} {}", red("!"), diag.message);
            }
            if cli.transcript || cli.verbose {
                eprintln!("\n{transcript}");
            } else if !cli.quiet {
                eprintln!("{}", dim("(re-run with --transcript for the full engine log)"));
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Compile failed"),
    };

    // ── Write the artifact ───────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
        return Ok(());
    }

    let pdf = output.pdf.as_deref().unwrap_or_default();
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli, &input_label));
    let mut file = std::fs::File::create(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    file.write_all(pdf)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        let tick = if output.warnings { cyan("⚠") } else { green("✔") };
        eprintln!(
            "{tick}  {} passes  {}ms  →  {}",
            output.stats.passes_run,
            output.stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        if output.warnings {
            eprintln!(
                "   {} diagnostic(s) from the engine:",
                output.errors.len()
            );
            for diag in output.errors.iter().take(5) {
                eprintln!("   {} {}", dim("·"), diag.message);
            }
            if output.errors.len() > 5 {
                eprintln!("   {}", dim(&format!("… and {} more", output.errors.len() - 5)));
            }
        }
        if cli.transcript {
            eprintln!("\n{}", output.transcript);
        }
    }

    Ok(())
}

/// Load either a structured JSON request or a bare .tex source.
async fn load_request(cli: &Cli) -> Result<(CompileRequest, String)> {
    if let Some(ref path) = cli.request {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request file {}", path.display()))?;
        let request: CompileRequest =
            serde_json::from_str(&content).context("Invalid compile request JSON")?;
        let label = request.filename.clone();
        return Ok((request, label));
    }

    let path = cli
        .input
        .as_ref()
        .context("Provide a .tex source file or --request")?;
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Input path has no usable filename")?
        .to_string();

    Ok((
        CompileRequest {
            content,
            filename: filename.clone(),
            ..Default::default()
        },
        filename,
    ))
}

/// Name the PDF after the source, next to the input.
fn default_output_path(cli: &Cli, input_label: &str) -> PathBuf {
    let stem = input_label.strip_suffix(".tex").unwrap_or(input_label);
    match cli.input.as_ref().and_then(|p| p.parent()) {
        Some(dir) if dir.as_os_str().is_empty() => PathBuf::from(format!("{stem}.pdf")),
        Some(dir) => dir.join(format!("{stem}.pdf")),
        None => PathBuf::from(format!("{stem}.pdf")),
    }
}
