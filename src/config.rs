//! Engine configuration for rendering and compilation.
//!
//! All process-wide knobs live in [`EngineConfig`], built via
//! [`EngineConfigBuilder`]. Nothing here is read from global state at use
//! sites — scratch root, shared secret, compiler commands are all passed
//! explicitly into the pipeline, so concurrent jobs under one long-lived
//! process stay independently testable.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor breaks on every new field. The builder lets
//! callers set only what they care about and rely on documented defaults.

use crate::error::Paper2TexError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the paper2tex engine.
///
/// Built via [`EngineConfig::builder()`] or [`EngineConfig::default()`].
///
/// # Example
/// ```rust
/// use paper2tex::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .latex_command("pdflatex")
///     .pass_timeout_secs(120)
///     .keep_aux(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// LaTeX engine executable. Default: `"pdflatex"`.
    ///
    /// Any engine accepting `-interaction=nonstopmode` works (pdflatex,
    /// xelatex, lualatex). Tests point this at a stub script.
    pub latex_command: String,

    /// Bibliography processor executable. Default: `"bibtex"`.
    pub bibliography_command: String,

    /// Per-pass wall-clock ceiling in seconds. Default: 300.
    ///
    /// A timed-out pass is killed and recorded as a diagnostic; the
    /// orchestrator still proceeds to artifact collection, because earlier
    /// passes may already have produced a usable PDF.
    pub pass_timeout_secs: u64,

    /// Run a third typesetting pass for full cross-reference resolution.
    /// Default: true.
    ///
    /// Two passes resolve most references; a third is needed when the
    /// bibliography changes page layout enough to shift labels. Turn off
    /// for draft builds where speed matters more than exact numbering.
    pub full_resolution: bool,

    /// Keep auxiliary files (.aux, .log, .bbl, …) in the working directory
    /// after a successful compile. Default: false.
    pub keep_aux: bool,

    /// Root directory for per-job scratch directories. Default: system temp.
    ///
    /// Every job gets its own directory beneath this root; no two jobs
    /// ever share one.
    pub scratch_root: Option<PathBuf>,

    /// Static shared secret expected from callers. Default: None (open).
    ///
    /// When set, [`crate::compile::compile`] rejects requests whose secret
    /// does not match before any processing happens.
    pub shared_secret: Option<String>,

    /// HTTP timeout for a single image fetch, in seconds. Default: 30.
    pub image_fetch_timeout_secs: u64,

    /// Maximum accepted Content-Length for an image fetch, in bytes.
    /// Default: 25 MiB.
    pub image_fetch_max_bytes: u64,

    /// Images above this size are recompressed before embedding.
    /// Default: 2 MiB.
    pub image_compress_threshold: u64,

    /// Maximum width/height after recompression, in pixels. Default: 1920.
    pub image_max_dimension: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latex_command: "pdflatex".to_string(),
            bibliography_command: "bibtex".to_string(),
            pass_timeout_secs: 300,
            full_resolution: true,
            keep_aux: false,
            scratch_root: None,
            shared_secret: None,
            image_fetch_timeout_secs: 30,
            image_fetch_max_bytes: 25 * 1024 * 1024,
            image_compress_threshold: 2 * 1024 * 1024,
            image_max_dimension: 1920,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Pass timeout as a [`Duration`].
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    /// Image fetch timeout as a [`Duration`].
    pub fn image_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.image_fetch_timeout_secs)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn latex_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.latex_command = cmd.into();
        self
    }

    pub fn bibliography_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.bibliography_command = cmd.into();
        self
    }

    pub fn pass_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pass_timeout_secs = secs.max(1);
        self
    }

    pub fn full_resolution(mut self, v: bool) -> Self {
        self.config.full_resolution = v;
        self
    }

    pub fn keep_aux(mut self, v: bool) -> Self {
        self.config.keep_aux = v;
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(root.into());
        self
    }

    pub fn shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.shared_secret = Some(secret.into());
        self
    }

    pub fn image_fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn image_fetch_max_bytes(mut self, bytes: u64) -> Self {
        self.config.image_fetch_max_bytes = bytes;
        self
    }

    pub fn image_compress_threshold(mut self, bytes: u64) -> Self {
        self.config.image_compress_threshold = bytes;
        self
    }

    pub fn image_max_dimension(mut self, px: u32) -> Self {
        self.config.image_max_dimension = px.max(100);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, Paper2TexError> {
        let c = &self.config;
        if c.latex_command.trim().is_empty() {
            return Err(Paper2TexError::InvalidConfig(
                "latex_command must not be empty".into(),
            ));
        }
        if c.bibliography_command.trim().is_empty() {
            return Err(Paper2TexError::InvalidConfig(
                "bibliography_command must not be empty".into(),
            ));
        }
        if let Some(ref root) = c.scratch_root {
            if root.as_os_str().is_empty() {
                return Err(Paper2TexError::InvalidConfig(
                    "scratch_root must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.latex_command, "pdflatex");
        assert_eq!(c.bibliography_command, "bibtex");
        assert_eq!(c.pass_timeout_secs, 300);
        assert!(c.full_resolution);
        assert!(!c.keep_aux);
        assert_eq!(c.image_compress_threshold, 2 * 1024 * 1024);
        assert_eq!(c.image_max_dimension, 1920);
    }

    #[test]
    fn builder_clamps_timeout() {
        let c = EngineConfig::builder()
            .pass_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.pass_timeout_secs, 1);
    }

    #[test]
    fn empty_command_rejected() {
        let err = EngineConfig::builder().latex_command("  ").build();
        assert!(matches!(err, Err(Paper2TexError::InvalidConfig(_))));
    }
}
