//! Output types returned by the rendering and compilation entry points.

use crate::pipeline::diagnostics::Diagnostic;
use serde::{Deserialize, Serialize};

/// The markup-only product: a LaTeX source string plus what it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutput {
    /// The complete LaTeX document source.
    pub markup: String,
    /// Safe ids of images the markup actually references (a subset of the
    /// resolved map: dropped and unresolved references never appear).
    pub referenced_images: Vec<String>,
    /// Whether any citation command was emitted; decides if a
    /// bibliography pass is worth running.
    pub has_citations: bool,
    /// Suggested filename for the markup byte stream.
    pub suggested_filename: String,
}

/// Result of a full compilation, successful or soft-failed.
///
/// `success` is decided solely by artifact presence. A job whose passes all
/// exited non-zero but which left a non-empty PDF reports `success: true`
/// with `warnings: true` and a populated diagnostics list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOutput {
    pub success: bool,
    /// The compiled PDF bytes; base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub pdf: Option<Vec<u8>>,
    /// Human-readable transcript (noise-stripped, class-labeled).
    /// Display-only; structured records live in `errors`.
    pub transcript: String,
    /// Ordered diagnostics from all passes, discovery order.
    pub errors: Vec<Diagnostic>,
    /// True when any diagnostic was recorded or any pass misbehaved.
    pub warnings: bool,
    pub stats: CompileStats,
}

/// Timing and pass accounting for one compilation job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileStats {
    /// Typesetting passes actually run (1–3).
    pub passes_run: u32,
    /// Whether the bibliography processor ran.
    pub bibliography_run: bool,
    /// Image assets written into the working directory.
    pub image_assets: usize,
    pub total_duration_ms: u64,
}

/// Serde helper: `Option<Vec<u8>>` as an optional base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_output_pdf_roundtrips_as_base64() {
        let out = CompileOutput {
            success: true,
            pdf: Some(vec![0x25, 0x50, 0x44, 0x46]),
            transcript: String::new(),
            errors: vec![],
            warnings: false,
            stats: CompileStats::default(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["pdf"], "JVBERg==");

        let back: CompileOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back.pdf, Some(b"%PDF".to_vec()));
    }

    #[test]
    fn absent_pdf_serialises_as_null() {
        let out = CompileOutput {
            success: false,
            pdf: None,
            transcript: "t".into(),
            errors: vec![],
            warnings: true,
            stats: CompileStats::default(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert!(json["pdf"].is_null());
    }
}
