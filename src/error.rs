//! Error types for the paper2tex library.
//!
//! Two distinct failure modes get two distinct representations:
//!
//! * [`Paper2TexError`] — **Fatal**: the request cannot produce a document
//!   at all (rejected filename, unauthorized caller, no artifact after all
//!   compiler passes). Returned as `Err(Paper2TexError)` from the top-level
//!   entry points.
//!
//! * [`crate::pipeline::diagnostics::Diagnostic`] — **Non-fatal**: a single
//!   unknown block, a single failed image fetch, a single noisy compiler
//!   pass. Collected and surfaced alongside the result so one bad element
//!   never loses the whole paper.
//!
//! The split encodes the partial-failure policy: lower pipeline stages never
//! raise on recoverable conditions; only the absence of a final artifact
//! escalates to a hard error — and even that error carries whatever
//! transcript and diagnostics had accumulated.

use crate::pipeline::diagnostics::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paper2tex library.
#[derive(Debug, Error)]
pub enum Paper2TexError {
    // ── Boundary errors ───────────────────────────────────────────────────
    /// Shared-secret check failed; no processing was performed.
    #[error("Unauthorized: shared secret mismatch")]
    Unauthorized,

    /// Input rejected before any processing (bad filename, empty content,
    /// path traversal attempt).
    #[error("Invalid request: {detail}")]
    Validation { detail: String },

    // ── Upstream errors ───────────────────────────────────────────────────
    /// A store or image fetch failed in a non-recoverable way.
    ///
    /// Single image failures inside a batch are *not* this error — they are
    /// diagnostics on the batch. This variant is for fetches the caller
    /// depends on entirely (paper record, section list).
    #[error("Upstream fetch failed for '{url}': {reason}")]
    UpstreamFetch { url: String, reason: String },

    /// The upstream rate-limited us and every backoff attempt was consumed.
    #[error("Rate limited by upstream after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    // ── Compilation errors ────────────────────────────────────────────────
    /// No output artifact existed after the final pass.
    ///
    /// This is the only way a compilation fails hard: pass exit codes never
    /// matter on their own. The transcript and diagnostics captured along
    /// the way come attached so callers can show the user what went wrong.
    #[error("Compilation produced no output artifact ({} diagnostics)", diagnostics.len())]
    CompilationFailed {
        transcript: String,
        diagnostics: Vec<Diagnostic>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the job working directory or write job inputs.
    #[error("Failed to write '{}': {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error, converted to a generic structured failure
    /// at the outer boundary.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Paper2TexError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let e = Paper2TexError::validation("filename escapes scratch root");
        assert!(e.to_string().contains("filename escapes"));
    }

    #[test]
    fn compilation_failed_display_counts_diagnostics() {
        let e = Paper2TexError::CompilationFailed {
            transcript: "error: Undefined control sequence".into(),
            diagnostics: vec![],
        };
        assert!(e.to_string().contains("0 diagnostics"));
    }

    #[test]
    fn unauthorized_display() {
        assert!(Paper2TexError::Unauthorized
            .to_string()
            .contains("shared secret"));
    }
}
