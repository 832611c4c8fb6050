//! Top-level entry points: the compile boundary and the paper pipeline.
//!
//! ## The boundary contract
//!
//! One structured entry point, [`compile`], accepts a [`CompileRequest`]
//! (markup + optional bibliography + optional image references), runs the
//! shared-secret check before any processing, sanitises every
//! caller-supplied filename, and drives the orchestrator. It returns a
//! structured [`CompileOutput`] for every outcome short of a hard failure —
//! and even the hard-failure error carries the accumulated transcript and
//! diagnostics, so the hosting service always has something to show.
//!
//! ## The paper pipeline
//!
//! [`render_paper`] is the eager full-document path: fetch the paper from
//! the store (rate limits retried with backoff), extract every section,
//! collect and resolve images, and render LaTeX plus BibTeX. Its output
//! feeds straight into [`compile`] via [`PaperArtifacts::into_request`].

use crate::config::EngineConfig;
use crate::document::{DocumentOptions, Section};
use crate::error::Paper2TexError;
use crate::output::{CompileOutput, RenderOutput};
use crate::pipeline::images::{
    collect_image_refs, content_type_for, resolve_images, ImageRef, ResolvedImages,
};
use crate::pipeline::markup::{render_bibliography, render_document, BIB_STEM};
use crate::pipeline::typeset::CompileJob;
use crate::pipeline::{diagnostics, extract};
use crate::retry::{RetryPolicy, TokioSleeper};
use crate::store::{fetch_with_backoff, DocumentStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

// ── Request contract ─────────────────────────────────────────────────────

/// The structured compile request accepted at the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    /// Complete LaTeX source.
    pub content: String,
    /// Source filename; reduced to its base name before filesystem use.
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bibliography: Option<BibliographyFile>,
    /// Image references keyed by id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub image_references: BTreeMap<String, ImageAsset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BibliographyFile {
    pub content: String,
    pub filename: String,
}

/// One image reference in a compile request: a URL to fetch or embedded
/// base64 data, plus the asset filename the markup expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_data: Option<String>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

// ── Authorization ────────────────────────────────────────────────────────

/// Static shared-secret check, constant-time over the secret bytes.
pub fn authorize(provided: &str, expected: &str) -> bool {
    let a = provided.as_bytes();
    let b = expected.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Filename sanitisation ────────────────────────────────────────────────

/// Reduce a caller-supplied filename to a safe base name.
///
/// Directory components are stripped; traversal segments, hidden names,
/// and empty results are rejected. A name without an extension gains the
/// given default so the engine can find its input.
pub fn sanitize_filename(name: &str, default_ext: &str) -> Result<String, Paper2TexError> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    if base.is_empty() || base == "." || base == ".." {
        return Err(Paper2TexError::validation(format!(
            "filename '{name}' reduces to nothing usable"
        )));
    }
    if base.starts_with('.') || base.contains("..") {
        return Err(Paper2TexError::validation(format!(
            "filename '{name}' looks like a traversal attempt"
        )));
    }
    if base.contains(':') || base.contains('\0') {
        return Err(Paper2TexError::validation(format!(
            "filename '{name}' contains forbidden characters"
        )));
    }

    Ok(if base.contains('.') {
        base
    } else {
        format!("{base}.{default_ext}")
    })
}

// ── Compile boundary ─────────────────────────────────────────────────────

/// Compile a markup request to PDF.
///
/// # Arguments
/// * `request` — the structured compile contract
/// * `provided_secret` — the caller's shared secret, checked against
///   `config.shared_secret` before any processing
/// * `config` — engine configuration
///
/// # Returns
/// `Ok(CompileOutput)` whenever an artifact was produced — including jobs
/// whose passes exited non-zero (`warnings: true`, diagnostics populated).
///
/// # Errors
/// * [`Paper2TexError::Unauthorized`] — secret mismatch, nothing ran
/// * [`Paper2TexError::Validation`] — rejected filename or empty content
/// * [`Paper2TexError::CompilationFailed`] — no artifact after all passes;
///   carries the accumulated transcript and diagnostics
pub async fn compile(
    request: CompileRequest,
    provided_secret: Option<&str>,
    config: &EngineConfig,
) -> Result<CompileOutput, Paper2TexError> {
    let start = Instant::now();

    // ── Step 1: Authorize before anything else ───────────────────────────
    if let Some(ref expected) = config.shared_secret {
        match provided_secret {
            Some(provided) if authorize(provided, expected) => {}
            _ => return Err(Paper2TexError::Unauthorized),
        }
    }

    // ── Step 2: Validate inputs ──────────────────────────────────────────
    if request.content.trim().is_empty() {
        return Err(Paper2TexError::validation("markup content is empty"));
    }
    let source_name = sanitize_filename(&request.filename, "tex")?;
    let bibliography = request
        .bibliography
        .as_ref()
        .map(|b| Ok::<_, Paper2TexError>((sanitize_filename(&b.filename, "bib")?, b.content.as_str())))
        .transpose()?;

    info!("Compile request: '{}'", source_name);

    // ── Step 3: Resolve image references ─────────────────────────────────
    let mut request_diags = Vec::new();
    let resolved = resolve_request_images(&request, config, &mut request_diags).await;
    let mut assets: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for image_ref in resolved.images.values() {
        if let Some(ref payload) = image_ref.payload {
            assets.insert(image_ref.filename.clone(), payload.data.clone());
        }
    }

    // ── Step 4: Materialise the job ──────────────────────────────────────
    let job = CompileJob::create(
        config,
        &source_name,
        &request.content,
        bibliography.as_ref().map(|(name, content)| (name.as_str(), *content)),
        &assets,
    )?;

    // ── Step 5: Drive the pass state machine ─────────────────────────────
    let outcome = job.run(config).await;

    // ── Step 6: Assemble the response ────────────────────────────────────
    let mut all_diags = request_diags;
    all_diags.extend(resolved.diagnostics);
    all_diags.extend(outcome.diagnostics);
    let transcript = diagnostics::format_transcript(&outcome.raw_log);

    match outcome.artifact {
        Some(pdf) => {
            let warnings = !all_diags.is_empty();
            let mut stats = outcome.stats;
            stats.total_duration_ms = start.elapsed().as_millis() as u64;
            debug!(
                "Compile '{}' succeeded with {} diagnostic(s)",
                source_name,
                all_diags.len()
            );
            Ok(CompileOutput {
                success: true,
                pdf: Some(pdf),
                transcript,
                errors: all_diags,
                warnings,
                stats,
            })
        }
        None => Err(Paper2TexError::CompilationFailed {
            transcript,
            diagnostics: all_diags,
        }),
    }
}

/// Turn request-supplied image references into resolved bytes.
///
/// Invalid entries (no url and no embedded data, bad filename) are dropped
/// with a diagnostic; resolution failures come back flagged on the batch.
async fn resolve_request_images(
    request: &CompileRequest,
    config: &EngineConfig,
    diags: &mut Vec<diagnostics::Diagnostic>,
) -> ResolvedImages {
    let mut refs = BTreeMap::new();

    for (id, asset) in &request.image_references {
        let filename = match sanitize_filename(&asset.filename, "jpg") {
            Ok(f) => f,
            Err(e) => {
                diags.push(diagnostics::Diagnostic::warning(
                    format!("image '{id}': {e}"),
                    asset.filename.clone(),
                ));
                continue;
            }
        };
        if asset.url.is_none() && asset.embedded_data.is_none() {
            diags.push(diagnostics::Diagnostic::warning(
                format!("image '{id}': neither url nor embedded data supplied"),
                String::new(),
            ));
            continue;
        }
        if let Some(ref url) = asset.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                diags.push(diagnostics::Diagnostic::warning(
                    format!("image '{id}': unsupported URL scheme"),
                    url.clone(),
                ));
                continue;
            }
        }

        refs.insert(
            id.clone(),
            ImageRef {
                id: id.clone(),
                url: asset.url.clone().unwrap_or_default(),
                display_name: id.clone(),
                filename: filename.clone(),
                section_name: String::new(),
                validated: true,
                embedded: asset.embedded_data.clone(),
                payload: None,
            },
        );
    }

    resolve_images(refs, config).await
}

/// Render the markup-only product for callers that export `.tex` instead
/// of compiling: the LaTeX source, its suggested filename, and the set of
/// image assets it references.
pub fn render_markup(
    sections: &[Section],
    images: &ResolvedImages,
    options: &DocumentOptions,
    meta: &crate::document::PaperMeta,
) -> RenderOutput {
    render_document(sections, images, options, meta)
}

// ── Paper pipeline ───────────────────────────────────────────────────────

/// Everything the full-document path produces before compilation.
#[derive(Debug)]
pub struct PaperArtifacts {
    pub sections: Vec<Section>,
    pub markup: RenderOutput,
    /// BibTeX source; `None` when the paper cites nothing.
    pub bibliography: Option<String>,
    pub images: ResolvedImages,
    pub diagnostics: Vec<diagnostics::Diagnostic>,
}

impl PaperArtifacts {
    /// Assemble a [`CompileRequest`] from the rendered artifacts, embedding
    /// every referenced image's resolved bytes.
    pub fn into_request(self) -> CompileRequest {
        let mut image_references = BTreeMap::new();
        for safe_id in &self.markup.referenced_images {
            if let Some(image_ref) = self.images.images.get(safe_id) {
                if let Some(ref payload) = image_ref.payload {
                    image_references.insert(
                        safe_id.clone(),
                        ImageAsset {
                            url: None,
                            embedded_data: Some(payload.to_base64()),
                            filename: image_ref.filename.clone(),
                            content_type: Some(
                                content_type_for(&image_ref.filename).to_string(),
                            ),
                        },
                    );
                }
            }
        }

        CompileRequest {
            content: self.markup.markup,
            filename: self.markup.suggested_filename,
            bibliography: self.bibliography.map(|content| BibliographyFile {
                content,
                filename: format!("{BIB_STEM}.bib"),
            }),
            image_references,
        }
    }
}

/// Fetch, extract, resolve, and render one paper from the store.
///
/// Store rate limits are retried under `policy`; all other store errors
/// propagate immediately as [`Paper2TexError::UpstreamFetch`].
pub async fn render_paper<S: DocumentStore>(
    store: &S,
    paper_id: u64,
    options: &DocumentOptions,
    policy: &RetryPolicy,
    config: &EngineConfig,
) -> Result<PaperArtifacts, Paper2TexError> {
    let sleeper = TokioSleeper;

    // ── Step 1: Fetch the paper and its pieces ───────────────────────────
    let paper = fetch_with_backoff(policy, &sleeper, || store.fetch_paper(paper_id))
        .await
        .map_err(|e| upstream(paper_id, e, policy))?;
    if !paper.is_paper {
        return Err(Paper2TexError::validation(format!(
            "document {paper_id} is not a paper"
        )));
    }
    info!("Rendering paper {} '{}'", paper.id, paper.name);

    let section_records =
        fetch_with_backoff(policy, &sleeper, || store.fetch_sections(paper_id))
            .await
            .map_err(|e| upstream(paper_id, e, policy))?;
    let citations = fetch_with_backoff(policy, &sleeper, || store.fetch_citations(paper_id))
        .await
        .map_err(|e| upstream(paper_id, e, policy))?;
    let meta = fetch_with_backoff(policy, &sleeper, || store.fetch_meta(paper_id))
        .await
        .map_err(|e| upstream(paper_id, e, policy))?;

    // ── Step 2: Extract every section ────────────────────────────────────
    let mut sections = Vec::with_capacity(section_records.len());
    let mut diags = Vec::new();
    for record in &section_records {
        let (section, section_diags) = extract::extract_section(record.id, &record.name, &record.fragment);
        sections.push(section);
        diags.extend(section_diags);
    }

    // ── Step 3: Collect and resolve images ───────────────────────────────
    let (refs, collect_diags) = collect_image_refs(&sections);
    diags.extend(collect_diags);
    let images = resolve_images(refs, config).await;

    // ── Step 4: Render markup and bibliography ───────────────────────────
    let markup = render_document(&sections, &images, options, &meta);
    let bibliography = if markup.has_citations && !citations.is_empty() {
        Some(render_bibliography(&citations))
    } else {
        None
    };

    Ok(PaperArtifacts {
        sections,
        markup,
        bibliography,
        images,
        diagnostics: diags,
    })
}

fn upstream(paper_id: u64, e: crate::store::StoreError, policy: &RetryPolicy) -> Paper2TexError {
    match e {
        crate::store::StoreError::RateLimited => Paper2TexError::RateLimitExhausted {
            attempts: policy.max_attempts,
        },
        other => Paper2TexError::UpstreamFetch {
            url: format!("paper/{paper_id}"),
            reason: other.to_string(),
        },
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
