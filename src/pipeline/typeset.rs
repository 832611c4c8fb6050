//! Compilation orchestration: drive the external LaTeX engine to a PDF.
//!
//! ## The partial-failure policy
//!
//! LaTeX engines routinely exit non-zero for conditions they recover from:
//! undefined references before the second pass, missing optional packages,
//! overfull boxes under strict settings. Treating exit codes as
//! authoritative would reject most real documents. The orchestrator
//! therefore runs a fixed state machine —
//!
//! ```text
//! WRITE_SOURCES → PASS 1 → [BIBLIOGRAPHY] → PASS 2 → [PASS 3] → COLLECT → CLEANUP
//! ```
//!
//! — where every pass is best-effort: a non-zero exit, a spawn error, or a
//! timeout is recorded as a diagnostic and the machine continues. Only
//! COLLECT decides the outcome, and its sole predicate is "the expected
//! artifact exists and is non-empty".
//!
//! ## Isolation
//!
//! Each job exclusively owns a fresh temp directory beneath the configured
//! scratch root. No two jobs ever share a directory, and passes of one job
//! are strictly sequential (later passes consume the .aux/.bbl side files
//! of earlier ones), so no locking is needed anywhere.

use crate::config::EngineConfig;
use crate::error::Paper2TexError;
use crate::output::CompileStats;
use crate::pipeline::diagnostics::{self, Diagnostic};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One compilation job and its exclusively-owned working directory.
///
/// The directory lives as long as the job value; dropping the job removes
/// whatever cleanup left behind.
pub struct CompileJob {
    work_dir: TempDir,
    /// Source file stem; the engine names its outputs after this.
    jobname: String,
    source_file: PathBuf,
    bibliography_file: Option<PathBuf>,
    image_assets: BTreeMap<String, PathBuf>,
    diagnostics: Vec<Diagnostic>,
    raw_log: String,
}

/// Everything COLLECT produced, handed back to the boundary.
pub struct JobOutcome {
    /// PDF bytes when the artifact existed and was non-empty.
    pub artifact: Option<Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
    pub raw_log: String,
    pub stats: CompileStats,
}

impl CompileJob {
    /// WRITE_SOURCES: materialise source, bibliography, and image assets
    /// into a fresh working directory.
    ///
    /// `source_name` and the bibliography name must already be sanitised
    /// base names (the boundary enforces this before building a job).
    pub fn create(
        config: &EngineConfig,
        source_name: &str,
        source_content: &str,
        bibliography: Option<(&str, &str)>,
        image_assets: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, Paper2TexError> {
        let work_dir = match &config.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| Paper2TexError::OutputWrite {
                    path: root.clone(),
                    source: e,
                })?;
                TempDir::with_prefix_in("paper2tex-", root)
            }
            None => TempDir::with_prefix("paper2tex-"),
        }
        .map_err(|e| Paper2TexError::Internal(format!("scratch dir: {e}")))?;

        let write = |name: &str, bytes: &[u8]| -> Result<PathBuf, Paper2TexError> {
            let path = work_dir.path().join(name);
            std::fs::write(&path, bytes).map_err(|e| Paper2TexError::OutputWrite {
                path: path.clone(),
                source: e,
            })?;
            Ok(path)
        };

        let source_file = write(source_name, source_content.as_bytes())?;
        let bibliography_file = bibliography
            .map(|(name, content)| write(name, content.as_bytes()))
            .transpose()?;

        let mut assets = BTreeMap::new();
        for (filename, bytes) in image_assets {
            assets.insert(filename.clone(), write(filename, bytes)?);
        }

        let jobname = source_name
            .strip_suffix(".tex")
            .unwrap_or(source_name)
            .to_string();

        debug!(
            "Job '{}' materialised in {} ({} image asset(s), bibliography={})",
            jobname,
            work_dir.path().display(),
            assets.len(),
            bibliography_file.is_some()
        );

        Ok(Self {
            work_dir,
            jobname,
            source_file,
            bibliography_file,
            image_assets: assets,
            diagnostics: Vec::new(),
            raw_log: String::new(),
        })
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Drive the pass state machine to completion and collect the artifact.
    ///
    /// Never returns `Err` for pass failures — those are diagnostics. The
    /// caller decides hard failure from `JobOutcome.artifact`.
    pub async fn run(mut self, config: &EngineConfig) -> JobOutcome {
        let start = Instant::now();
        let mut stats = CompileStats::default();
        stats.image_assets = self.image_assets.len();

        // PASS 1
        self.typeset_pass(config, 1).await;
        stats.passes_run = 1;

        // BIBLIOGRAPHY (best-effort, only when supplied)
        if self.bibliography_file.is_some() {
            self.bibliography_pass(config).await;
            stats.bibliography_run = true;
        }

        // PASS 2: resolves cross-references (and citations, via the .bbl
        // written by the bibliography pass).
        self.typeset_pass(config, 2).await;
        stats.passes_run = 2;

        // PASS 3: only when full resolution is requested; the bibliography
        // can shift page layout enough to invalidate pass-2 labels.
        if config.full_resolution {
            self.typeset_pass(config, 3).await;
            stats.passes_run = 3;
        }

        // COLLECT_ARTIFACT: the one and only success predicate.
        let artifact = self.collect_artifact();

        // CLEANUP
        self.cleanup(artifact.is_some(), config);

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Job '{}': artifact={}, {} diagnostic(s), {}ms",
            self.jobname,
            artifact.is_some(),
            self.diagnostics.len(),
            stats.total_duration_ms
        );

        let CompileJob {
            work_dir,
            diagnostics,
            raw_log,
            ..
        } = self;
        if config.keep_aux {
            // Disarm the TempDir so the directory survives for inspection.
            let kept = work_dir.keep();
            info!("keep_aux: job directory retained at {}", kept.display());
        }

        JobOutcome {
            artifact,
            diagnostics,
            raw_log,
            stats,
        }
    }

    /// One bounded typesetting pass. Failures become diagnostics.
    async fn typeset_pass(&mut self, config: &EngineConfig, pass: u32) {
        let source = self
            .source_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.tex", self.jobname));

        let outcome = run_process(
            &config.latex_command,
            &["-interaction=nonstopmode", "-file-line-error", &source],
            self.work_dir.path(),
            config.pass_timeout(),
        )
        .await;
        self.absorb(outcome, &format!("typesetting pass {pass}"));
    }

    /// The bibliography processor run between passes 1 and 2. Best-effort:
    /// a missing or failing processor never stops the machine.
    async fn bibliography_pass(&mut self, config: &EngineConfig) {
        let jobname = self.jobname.clone();
        let outcome = run_process(
            &config.bibliography_command,
            &[&jobname],
            self.work_dir.path(),
            config.pass_timeout(),
        )
        .await;
        self.absorb(outcome, "bibliography pass");
    }

    /// Merge a pass outcome into the job log and diagnostics.
    fn absorb(&mut self, outcome: PassOutcome, label: &str) {
        self.raw_log.push_str(&outcome.log);
        if !outcome.log.ends_with('\n') {
            self.raw_log.push('\n');
        }
        self.diagnostics.extend(diagnostics::parse_log(&outcome.log));

        if let Some(failure) = outcome.failure {
            warn!("{label}: {failure}");
            self.diagnostics
                .push(Diagnostic::warning(format!("{label}: {failure}"), String::new()));
        } else if !outcome.exit_ok {
            // Non-zero exit is routine; record it and move on.
            debug!("{label}: non-zero exit tolerated");
            self.diagnostics.push(Diagnostic::warning(
                format!("{label} exited non-zero; continuing"),
                String::new(),
            ));
        }
    }

    /// COLLECT_ARTIFACT: success iff `<jobname>.pdf` exists and is
    /// non-empty, irrespective of any pass's exit code.
    fn collect_artifact(&self) -> Option<Vec<u8>> {
        let path = self.work_dir.path().join(format!("{}.pdf", self.jobname));
        match std::fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                warn!("artifact {} exists but is empty", path.display());
                None
            }
            Err(_) => None,
        }
    }

    /// CLEANUP: image assets go only once an artifact is confirmed;
    /// auxiliary files go unless the caller asked to keep them. The
    /// TempDir removes the directory itself when the job drops, unless
    /// `keep_aux` disarms it in [`CompileJob::run`].
    fn cleanup(&self, artifact_present: bool, config: &EngineConfig) {
        if artifact_present {
            for path in self.image_assets.values() {
                if let Err(e) = std::fs::remove_file(path) {
                    debug!("cleanup: could not remove {}: {e}", path.display());
                }
            }
        }
        if !config.keep_aux {
            for ext in ["aux", "log", "bbl", "blg", "out", "toc"] {
                let path = self.work_dir.path().join(format!("{}.{ext}", self.jobname));
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// What one external-process invocation produced.
struct PassOutcome {
    /// Combined stdout + stderr.
    log: String,
    exit_ok: bool,
    /// Process-level failure (spawn error, timeout); distinct from a
    /// non-zero exit.
    failure: Option<String>,
}

/// Run one bounded external process in the job directory.
///
/// `kill_on_drop` ensures a timed-out engine does not outlive its pass.
async fn run_process(
    command: &str,
    args: &[&str],
    dir: &Path,
    ceiling: Duration,
) -> PassOutcome {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .current_dir(dir)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    match timeout(ceiling, cmd.output()).await {
        Ok(Ok(output)) => {
            let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.stderr.is_empty() {
                log.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            PassOutcome {
                log,
                exit_ok: output.status.success(),
                failure: None,
            }
        }
        Ok(Err(e)) => PassOutcome {
            log: String::new(),
            exit_ok: false,
            failure: Some(format!("failed to run '{command}': {e}")),
        },
        Err(_) => PassOutcome {
            log: String::new(),
            exit_ok: false,
            failure: Some(format!(
                "'{command}' exceeded the {}s pass ceiling and was killed",
                ceiling.as_secs()
            )),
        },
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
//
// Orchestrator behaviour against real executables is covered in
// tests/compile.rs with a stub engine script; here we test the pieces that
// need no process.
