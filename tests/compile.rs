//! Integration tests for the compile boundary.
//!
//! No LaTeX installation is required: `latex_command` is pointed at stub
//! shell scripts that imitate engine behaviour — emit a log, exit with a
//! chosen status, and optionally write a `jobname.pdf`. This exercises the
//! real process-spawning path, the pass state machine, artifact-presence
//! success semantics, and diagnostics parsing end to end.
//!
//! Run with:
//!   cargo test --test compile

#![cfg(unix)]

use paper2tex::{compile, CompileRequest, EngineConfig, Paper2TexError};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Write an executable stub script into `dir` and return its path.
fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Engine stub that writes a plausible PDF artifact and a log, then exits
/// with `exit_code`. The jobname is the last argument minus its extension.
fn engine_stub(dir: &Path, exit_code: i32, log_lines: &str) -> PathBuf {
    let body = format!(
        r#"for last in "$@"; do :; done
job="${{last%.tex}}"
printf '%%PDF-1.5 stub artifact bytes' > "$job.pdf"
tee "$job.log" <<'EOF'
{log_lines}
EOF
exit {exit_code}"#
    );
    write_stub(dir, "engine-ok.sh", &body)
}

/// Engine stub that logs an error and never produces an artifact.
fn broken_engine_stub(dir: &Path) -> PathBuf {
    let body = r#"for last in "$@"; do :; done
job="${last%.tex}"
tee "$job.log" <<'EOF'
This is pdfTeX, Version 3.14159265
! Undefined control sequence.
l.4 \nosuchmacro
EOF
exit 1"#;
    write_stub(dir, "engine-broken.sh", body)
}

fn config_with_engine(engine: &Path, scratch: &Path) -> EngineConfig {
    EngineConfig::builder()
        .latex_command(engine.to_str().unwrap())
        .bibliography_command("true")
        .full_resolution(false)
        .scratch_root(scratch)
        .pass_timeout_secs(30)
        .build()
        .unwrap()
}

fn request(content: &str) -> CompileRequest {
    CompileRequest {
        content: content.into(),
        filename: "main.tex".into(),
        ..Default::default()
    }
}

const MINIMAL_DOC: &str = "\\documentclass{article}\\begin{document}hi\\end{document}";

// ── Success semantics ────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_compile_produces_pdf() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let engine = engine_stub(stubs.path(), 0, "This is pdfTeX\nOutput written on main.pdf.");
    let config = config_with_engine(&engine, scratch.path());

    let output = compile(request(MINIMAL_DOC), None, &config).await.unwrap();

    assert!(output.success);
    assert!(!output.warnings, "clean run must not flag warnings");
    let pdf = output.pdf.expect("artifact bytes present");
    assert!(pdf.starts_with(b"%PDF"), "artifact should be the stub PDF");
    assert_eq!(output.stats.passes_run, 2, "draft mode runs two passes");
    assert!(output.errors.is_empty());
}

#[tokio::test]
async fn nonzero_exit_with_artifact_is_success_with_warnings() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    // Non-zero exit but a PDF still lands: warnings, not failure.
    let engine = engine_stub(
        stubs.path(),
        1,
        "LaTeX Warning: Citation `smith2019' on page 1 undefined.\n\
         ! Missing $ inserted.\nl.12 x^2",
    );
    let config = config_with_engine(&engine, scratch.path());

    let output = compile(request(MINIMAL_DOC), None, &config).await.unwrap();

    assert!(output.success, "artifact presence decides success");
    assert!(output.warnings);
    assert!(output.pdf.is_some());
    assert!(
        !output.errors.is_empty(),
        "pass diagnostics must be surfaced"
    );
    let messages: Vec<&str> = output.errors.iter().map(|d| d.message.as_str()).collect();
    assert!(
        messages.iter().any(|m| m.contains("Citation")),
        "parsed log warning expected in {messages:?}"
    );
}

#[tokio::test]
async fn full_resolution_runs_third_pass() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let engine = engine_stub(stubs.path(), 0, "Output written on main.pdf.");
    let config = EngineConfig::builder()
        .latex_command(engine.to_str().unwrap())
        .bibliography_command("true")
        .full_resolution(true)
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let output = compile(request(MINIMAL_DOC), None, &config).await.unwrap();
    assert_eq!(output.stats.passes_run, 3);
}

#[tokio::test]
async fn timed_out_pass_is_killed_but_artifact_still_collected() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    // Engine that writes the PDF immediately, then hangs past the ceiling.
    let body = r#"for last in "$@"; do :; done
job="${last%.tex}"
printf '%%PDF-1.5 slow artifact' > "$job.pdf"
sleep 30"#;
    let engine = write_stub(stubs.path(), "engine-slow.sh", body);
    let config = EngineConfig::builder()
        .latex_command(engine.to_str().unwrap())
        .full_resolution(false)
        .scratch_root(scratch.path())
        .pass_timeout_secs(1)
        .build()
        .unwrap();

    let output = compile(request(MINIMAL_DOC), None, &config).await.unwrap();

    assert!(output.success, "artifact written before the hang must win");
    assert!(output.warnings);
    assert!(output.pdf.is_some());
    assert!(
        output
            .errors
            .iter()
            .any(|d| d.message.contains("pass ceiling")),
        "each killed pass must leave a diagnostic: {:?}",
        output.errors
    );
}

// ── Hard failure ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn no_artifact_is_compilation_failed_with_transcript() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let engine = broken_engine_stub(stubs.path());
    let config = config_with_engine(&engine, scratch.path());

    let err = compile(request(MINIMAL_DOC), None, &config)
        .await
        .unwrap_err();

    match err {
        Paper2TexError::CompilationFailed {
            transcript,
            diagnostics,
        } => {
            assert!(
                transcript.contains("Undefined control sequence"),
                "transcript must carry the engine error: {transcript}"
            );
            assert!(!diagnostics.is_empty());
            assert!(diagnostics
                .iter()
                .any(|d| d.message.contains("Undefined control sequence")));
        }
        other => panic!("expected CompilationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_engine_is_compilation_failed_not_panic() {
    let scratch = TempDir::new().unwrap();
    let config = EngineConfig::builder()
        .latex_command("/nonexistent/paper2tex-no-such-engine")
        .full_resolution(false)
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let err = compile(request(MINIMAL_DOC), None, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Paper2TexError::CompilationFailed { .. }));
}

// ── Bibliography pass ────────────────────────────────────────────────────────

#[tokio::test]
async fn bibliography_triggers_bibtex_between_passes() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let engine = engine_stub(stubs.path(), 0, "Output written on main.pdf.");
    // Stub bibtex leaves a marker file so we can prove it ran in the job dir.
    let bibtex = write_stub(stubs.path(), "bibtex-stub.sh", "touch bibtex-ran");
    let config = EngineConfig::builder()
        .latex_command(engine.to_str().unwrap())
        .bibliography_command(bibtex.to_str().unwrap())
        .full_resolution(false)
        .keep_aux(true)
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let mut req = request(MINIMAL_DOC);
    req.bibliography = Some(paper2tex::BibliographyFile {
        content: "@misc{a, title={T}}".into(),
        filename: "references.bib".into(),
    });

    let output = compile(req, None, &config).await.unwrap();
    assert!(output.success);
    assert!(output.stats.bibliography_run);

    // keep_aux retains the job dir contents; find the marker.
    let marker_found = std::fs::read_dir(scratch.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|job_dir| job_dir.path().join("bibtex-ran").exists());
    assert!(marker_found, "bibtex stub should have run in the job dir");
}

// ── Boundary checks ──────────────────────────────────────────────────────────

#[tokio::test]
async fn shared_secret_enforced_before_any_engine_run() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    // Engine stub that would leave evidence if it ran.
    let engine = write_stub(stubs.path(), "never.sh", "touch engine-ran; exit 0");
    let config = EngineConfig::builder()
        .latex_command(engine.to_str().unwrap())
        .shared_secret("topsecret")
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let err = compile(request(MINIMAL_DOC), Some("wrong"), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Paper2TexError::Unauthorized));

    // Nothing may have been written beneath the scratch root.
    let jobs = std::fs::read_dir(scratch.path()).unwrap().count();
    assert_eq!(jobs, 0, "rejected request must not touch the filesystem");
}

#[tokio::test]
async fn traversal_filename_rejected() {
    let scratch = TempDir::new().unwrap();
    let config = EngineConfig::builder()
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    // A name that reduces to nothing after base-name reduction must fail.
    let bad = CompileRequest {
        content: MINIMAL_DOC.into(),
        filename: "a/..".into(),
        ..Default::default()
    };
    let err = compile(bad, None, &config).await.unwrap_err();
    assert!(matches!(err, Paper2TexError::Validation { .. }));
}

#[tokio::test]
async fn embedded_image_lands_in_job_directory() {
    let stubs = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    // Engine stub that fails if the image asset is absent.
    let body = r#"for last in "$@"; do :; done
job="${last%.tex}"
[ -f fig1.png ] || exit 9
printf '%%PDF-1.5 ok' > "$job.pdf"
: > "$job.log"
exit 0"#;
    let engine = write_stub(stubs.path(), "engine-img.sh", body);
    let config = config_with_engine(&engine, scratch.path());

    let mut req = request(MINIMAL_DOC);
    req.image_references.insert(
        "fig1".into(),
        paper2tex::ImageAsset {
            url: None,
            embedded_data: Some("aGVsbG8gaW1hZ2U=".into()),
            filename: "fig1.png".into(),
            content_type: Some("image/png".into()),
        },
    );

    let output = compile(req, None, &config).await.unwrap();
    assert!(output.success, "engine saw the materialised image asset");
    assert_eq!(output.stats.image_assets, 1);
}
