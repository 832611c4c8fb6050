//! # paper2tex
//!
//! Render collaboratively-edited academic papers into camera-ready PDF
//! through an external LaTeX engine.
//!
//! ## Why this crate?
//!
//! Editor documents live as per-section XML fragments with styled runs,
//! citation markers, and image references. Turning that into a submittable
//! PDF means extracting a typed block tree, fetching and bounding every
//! image, rendering escaped LaTeX plus a BibTeX database, and driving a
//! multi-pass engine whose exit codes are famously unreliable. This crate
//! does the whole chain and treats the produced artifact — not process exit
//! status — as the arbiter of success.
//!
//! ## Pipeline Overview
//!
//! ```text
//! paper fragments
//!  │
//!  ├─ 1. Extract   XML fragments → typed sections (blocks, runs, markers)
//!  ├─ 2. Images    collect refs, fetch/decode concurrently, recompress
//!  ├─ 3. Markup    sections → escaped LaTeX + BibTeX database
//!  ├─ 4. Typeset   isolated scratch dir, 2–3 engine passes + bibtex
//!  ├─ 5. Diagnose  parse engine log into structured diagnostics
//!  └─ 6. Assemble  PDF bytes + transcript + warnings + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paper2tex::{compile, CompileRequest, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let request = CompileRequest {
//!         content: "\\documentclass{article}\\begin{document}hi\\end{document}".into(),
//!         filename: "main.tex".into(),
//!         ..Default::default()
//!     };
//!     let output = compile(request, None, &config).await?;
//!     std::fs::write("main.pdf", output.pdf.unwrap_or_default())?;
//!     eprintln!("passes: {}, warnings: {}", output.stats.passes_run, output.warnings);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paper2tex` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding only the library:
//! ```toml
//! paper2tex = { version = "0.3", default-features = false }
//! ```
//!
//! ## Failure model
//!
//! A pass exiting non-zero is a *diagnostic*, not an error: engines report
//! recoverable conditions through non-zero exits while still emitting a
//! usable PDF. The compile is a hard failure only when no artifact exists
//! after all passes, and even then [`Paper2TexError::CompilationFailed`]
//! carries the full transcript and parsed diagnostics.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compile;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compile::{
    authorize, compile, render_markup, render_paper, BibliographyFile, CompileRequest,
    ImageAsset, PaperArtifacts,
};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use document::{
    Alignment, Author, Block, CitationSource, DocumentOptions, ImageBlock, Inline, PaperMeta,
    Section, Style, StyleRun,
};
pub use error::Paper2TexError;
pub use output::{CompileOutput, CompileStats, RenderOutput};
pub use pipeline::diagnostics::{Diagnostic, DiagnosticKind};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use store::{DocumentStore, PaperRecord, SectionRecord, StoreError};
