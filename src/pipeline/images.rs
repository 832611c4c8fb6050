//! Image reference collection and resolution.
//!
//! ## Two phases, one policy
//!
//! **Collect** scans every image block across sections, validates the
//! editor-supplied fields, and derives a filesystem-safe asset filename.
//! Invalid references (missing id/URL, non-http(s) scheme) are dropped with
//! one diagnostic each — exactly the graceful-degradation rule the rest of
//! the pipeline follows.
//!
//! **Resolve** turns each valid reference into bytes: either a pre-attached
//! base64 payload is decoded, or the URL is fetched with a timeout, a
//! content-length ceiling, and image-content-type acceptance. All
//! resolutions run concurrently with a single `join_all` join point; a
//! single failure never aborts the batch — the entry is marked unresolved
//! and counted.
//!
//! ## Why recompress above 2 MiB?
//!
//! Figure payloads end up base64-embedded in compile requests and written
//! into job directories; a 40 MB camera photo bloats both for no visual
//! gain at print resolution. Oversized rasters are re-encoded as JPEG
//! bounded to a maximum dimension (1920 px default), falling back to the
//! original bytes if re-encoding fails.

use crate::config::EngineConfig;
use crate::document::{Block, Section};
use crate::pipeline::diagnostics::Diagnostic;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::{debug, warn};

/// One validated image reference, keyed by its filesystem-safe id.
///
/// Mutated exactly once when bytes resolve; never removed from the map,
/// only left with `payload: None` when resolution fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    pub display_name: String,
    /// Derived asset filename (`safe_id.ext`), used inside the job
    /// working directory and in the rendered markup.
    pub filename: String,
    pub section_name: String,
    pub validated: bool,
    /// Pre-attached base64 payload from the compile request, if any.
    /// Takes precedence over a network fetch.
    pub embedded: Option<String>,
    pub payload: Option<ResolvedPayload>,
}

/// Bytes and provenance attached to a reference on resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPayload {
    pub data: Vec<u8>,
    pub content_type: String,
    pub original_bytes: u64,
    pub final_bytes: u64,
}

impl ResolvedPayload {
    /// Base64 form for embedding in a compile request.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// Result of a batch resolution.
#[derive(Debug, Default)]
pub struct ResolvedImages {
    pub images: BTreeMap<String, ImageRef>,
    /// Count of references that failed to resolve (still present in the
    /// map, flagged unresolved).
    pub failed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedImages {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

// ── Collection ───────────────────────────────────────────────────────────

/// Scan sections for image blocks and build the valid reference map.
///
/// Requires id and URL; derives the safe filename; validates the URL
/// scheme. References failing any check are discarded with a diagnostic.
pub fn collect_image_refs(
    sections: &[Section],
) -> (BTreeMap<String, ImageRef>, Vec<Diagnostic>) {
    let mut refs = BTreeMap::new();
    let mut diags = Vec::new();

    for section in sections {
        for block in &section.content {
            let Block::Image(img) = block else { continue };

            if img.image_id.is_empty() || img.image_url.is_empty() {
                diags.push(Diagnostic::warning(
                    format!(
                        "section '{}': image block missing id or url, skipped",
                        section.name
                    ),
                    format!("id='{}' url='{}'", img.image_id, img.image_url),
                ));
                continue;
            }
            if !img.image_url.starts_with("http://") && !img.image_url.starts_with("https://") {
                diags.push(Diagnostic::warning(
                    format!(
                        "section '{}': image '{}' has unsupported URL scheme, skipped",
                        section.name, img.image_id
                    ),
                    img.image_url.clone(),
                ));
                continue;
            }

            let safe_id = safe_id(&img.image_id);
            let filename = format!("{}.{}", safe_id, extension_for(&img.image_url));
            refs.insert(
                safe_id,
                ImageRef {
                    id: img.image_id.clone(),
                    url: img.image_url.clone(),
                    display_name: img.image_name.clone(),
                    filename,
                    section_name: section.name.clone(),
                    validated: true,
                    embedded: None,
                    payload: None,
                },
            );
        }
    }

    debug!(
        "Collected {} image reference(s), dropped {}",
        refs.len(),
        diags.len()
    );
    (refs, diags)
}

/// Replace every non-alphanumeric with `_` so the id is safe as a filename
/// and as a LaTeX label fragment.
fn safe_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Infer the asset extension from the URL path, defaulting to jpg.
fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('.').next().map(|e| e.to_ascii_lowercase()) {
        Some(e) if e == "jpeg" => "jpeg",
        Some(e) if e == "png" => "png",
        Some(e) if e == "pdf" => "pdf",
        Some(e) if e == "jpg" => "jpg",
        _ => "jpg",
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve all references concurrently: decode embedded payloads or fetch
/// over the network, then size-gate and recompress.
///
/// One join point, no early cancellation: a failed entry is flagged
/// unresolved and counted, never raised as a hard error.
pub async fn resolve_images(
    refs: BTreeMap<String, ImageRef>,
    config: &EngineConfig,
) -> ResolvedImages {
    if refs.is_empty() {
        return ResolvedImages::default();
    }

    let client = reqwest::Client::builder()
        .timeout(config.image_fetch_timeout())
        .build()
        .ok();

    let tasks = refs.into_iter().map(|(key, image_ref)| {
        let client = client.clone();
        async move {
            let outcome = resolve_one(&image_ref, client.as_ref(), config).await;
            (key, image_ref, outcome)
        }
    });

    let mut result = ResolvedImages::default();
    for (key, mut image_ref, outcome) in join_all(tasks).await {
        match outcome {
            Ok(payload) => {
                debug!(
                    "Resolved image '{}': {} -> {} bytes",
                    image_ref.id, payload.original_bytes, payload.final_bytes
                );
                image_ref.payload = Some(payload);
            }
            Err(diag) => {
                warn!("{}", diag.message);
                result.failed += 1;
                result.diagnostics.push(diag);
            }
        }
        result.images.insert(key, image_ref);
    }

    result
}

/// Resolve a single reference. Errors are diagnostics, not failures.
async fn resolve_one(
    image_ref: &ImageRef,
    client: Option<&reqwest::Client>,
    config: &EngineConfig,
) -> Result<ResolvedPayload, Diagnostic> {
    let (bytes, content_type) = if let Some(ref embedded) = image_ref.embedded {
        let decoded = decode_embedded(embedded).map_err(|e| {
            Diagnostic::warning(
                format!("image '{}': embedded data invalid: {e}", image_ref.id),
                image_ref.filename.clone(),
            )
        })?;
        if decoded.is_empty() {
            return Err(Diagnostic::warning(
                format!("image '{}': embedded data decoded to zero bytes", image_ref.id),
                image_ref.filename.clone(),
            ));
        }
        (decoded, content_type_for(&image_ref.filename).to_string())
    } else {
        fetch_bytes(image_ref, client, config).await?
    };

    let original_bytes = bytes.len() as u64;
    let is_raster = !content_type.eq_ignore_ascii_case("application/pdf");

    let data = if is_raster && original_bytes > config.image_compress_threshold {
        match recompress(&bytes, config.image_max_dimension) {
            Ok(smaller) => smaller,
            Err(e) => {
                // Recompression is best-effort; ship the original bytes.
                warn!(
                    "image '{}': recompression failed ({e}), keeping original",
                    image_ref.id
                );
                bytes
            }
        }
    } else {
        bytes
    };

    let final_bytes = data.len() as u64;
    Ok(ResolvedPayload {
        data,
        content_type,
        original_bytes,
        final_bytes,
    })
}

/// Fetch bytes over HTTP with timeout, size ceiling, and content-type check.
async fn fetch_bytes(
    image_ref: &ImageRef,
    client: Option<&reqwest::Client>,
    config: &EngineConfig,
) -> Result<(Vec<u8>, String), Diagnostic> {
    let client = client.ok_or_else(|| {
        Diagnostic::warning(
            format!("image '{}': HTTP client unavailable", image_ref.id),
            image_ref.url.clone(),
        )
    })?;

    let fail = |reason: String| {
        Diagnostic::warning(
            format!("image '{}': fetch failed: {reason}", image_ref.id),
            image_ref.url.clone(),
        )
    };

    let response = client
        .get(&image_ref.url)
        .send()
        .await
        .map_err(|e| fail(e.to_string()))?;

    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }

    if let Some(len) = response.content_length() {
        if len > config.image_fetch_max_bytes {
            return Err(fail(format!(
                "content length {len} exceeds ceiling {}",
                config.image_fetch_max_bytes
            )));
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    if let Some(ref ct) = content_type {
        if !ct.starts_with("image/") && ct != "application/pdf" {
            return Err(fail(format!("unacceptable content type '{ct}'")));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| fail(e.to_string()))?
        .to_vec();

    if bytes.is_empty() {
        return Err(fail("empty response body".into()));
    }
    if bytes.len() as u64 > config.image_fetch_max_bytes {
        return Err(fail(format!(
            "body of {} bytes exceeds ceiling {}",
            bytes.len(),
            config.image_fetch_max_bytes
        )));
    }

    let content_type =
        content_type.unwrap_or_else(|| content_type_for(&image_ref.filename).to_string());
    Ok((bytes, content_type))
}

/// Decode a base64 payload, tolerating a `data:…;base64,` prefix.
fn decode_embedded(embedded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let raw = embedded
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(embedded);
    STANDARD.decode(raw.trim())
}

/// Content type inferred from the derived filename extension.
pub fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "image/jpeg",
    }
}

/// Lossy JPEG re-encode bounded to `max_dimension` on the longest edge.
fn recompress(bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;

    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    // JPEG has no alpha channel; flatten before encoding.
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 80);
    encoder.encode_image(&rgb)?;
    Ok(buf)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Alignment, ImageBlock};

    fn section_with_images(images: Vec<ImageBlock>) -> Section {
        let mut s = Section::new(1, "Results");
        s.content = images.into_iter().map(Block::Image).collect();
        s
    }

    fn image(id: &str, url: &str) -> ImageBlock {
        ImageBlock {
            image_id: id.into(),
            image_url: url.into(),
            image_name: format!("Figure {id}"),
            caption: String::new(),
            alignment: Alignment::Center,
            owner_doc_id: "9".into(),
        }
    }

    #[test]
    fn collects_valid_reference_with_safe_filename() {
        let sections = vec![section_with_images(vec![image(
            "fig:one/α",
            "https://cdn.test/plots/figure.png",
        )])];
        let (refs, diags) = collect_image_refs(&sections);
        assert!(diags.is_empty());
        let r = refs.get("fig_one__").expect("safe id key");
        assert_eq!(r.filename, "fig_one__.png");
        assert!(r.validated);
        assert_eq!(r.section_name, "Results");
    }

    #[test]
    fn extension_inference() {
        assert_eq!(extension_for("https://x/a.png"), "png");
        assert_eq!(extension_for("https://x/a.JPEG"), "jpeg");
        assert_eq!(extension_for("https://x/a.pdf?token=1"), "pdf");
        assert_eq!(extension_for("https://x/a.webp"), "jpg");
        assert_eq!(extension_for("https://x/noext"), "jpg");
    }

    #[test]
    fn non_http_scheme_dropped_with_one_diagnostic() {
        let sections = vec![section_with_images(vec![image(
            "bad",
            "ftp://files.test/a.png",
        )])];
        let (refs, diags) = collect_image_refs(&sections);
        assert!(refs.is_empty());
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unsupported URL scheme"));
    }

    #[test]
    fn missing_fields_dropped() {
        let sections = vec![section_with_images(vec![
            image("", "https://x/a.png"),
            image("ok", ""),
        ])];
        let (refs, diags) = collect_image_refs(&sections);
        assert!(refs.is_empty());
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn no_image_blocks_yields_empty_map() {
        let sections = vec![Section::new(1, "Text only")];
        let (refs, diags) = collect_image_refs(&sections);
        assert!(refs.is_empty());
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn resolve_of_empty_map_never_fetches() {
        let out = resolve_images(BTreeMap::new(), &EngineConfig::default()).await;
        assert!(out.is_empty());
        assert_eq!(out.failed, 0);
    }

    #[tokio::test]
    async fn resolve_embedded_payload() {
        let png = tiny_png();
        let mut refs = BTreeMap::new();
        refs.insert(
            "a".to_string(),
            ImageRef {
                id: "a".into(),
                url: "https://unused.test/a.png".into(),
                display_name: "A".into(),
                filename: "a.png".into(),
                section_name: "s".into(),
                validated: true,
                embedded: Some(STANDARD.encode(&png)),
                payload: None,
            },
        );
        let out = resolve_images(refs, &EngineConfig::default()).await;
        assert_eq!(out.failed, 0);
        let payload = out.images["a"].payload.as_ref().expect("resolved");
        assert_eq!(payload.data, png);
        assert_eq!(payload.content_type, "image/png");
    }

    #[tokio::test]
    async fn empty_embedded_payload_counts_as_failure() {
        let mut refs = BTreeMap::new();
        refs.insert(
            "a".to_string(),
            ImageRef {
                id: "a".into(),
                url: "https://unused.test/a.png".into(),
                display_name: "A".into(),
                filename: "a.png".into(),
                section_name: "s".into(),
                validated: true,
                embedded: Some(String::new()),
                payload: None,
            },
        );
        let out = resolve_images(refs, &EngineConfig::default()).await;
        assert_eq!(out.failed, 1);
        assert!(out.images["a"].payload.is_none());
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn embedded_data_url_prefix_tolerated() {
        let decoded = decode_embedded("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn recompress_bounds_dimension() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            2400,
            1200,
            image::Rgb([120, 40, 200]),
        ));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let jpeg = recompress(&png, 1920).expect("recompress");
        let out = image::load_from_memory(&jpeg).expect("valid jpeg");
        assert!(out.width() <= 1920 && out.height() <= 1920);
    }

    #[test]
    fn recompress_rejects_garbage() {
        assert!(recompress(b"not an image", 1920).is_err());
    }

    /// Minimal in-memory PNG used as an embedded payload.
    fn tiny_png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            4,
            image::Rgb([1, 2, 3]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }
}
