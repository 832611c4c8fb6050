//! The document model: what a paper looks like between extraction and markup.
//!
//! The collaborative editor stores each section as a tree of rich-text
//! nodes. Extraction flattens that tree into the types here — a small,
//! closed set of block and inline variants — so the renderer can dispatch
//! on an exhaustive `match` instead of walking arbitrary XML. Anything the
//! extractor does not recognise never reaches this model; it is dropped at
//! the extraction boundary with a diagnostic.

use serde::{Deserialize, Serialize};

/// One inline formatting style.
///
/// Styles nest: a run inside `<bold><italic>…</italic></bold>` carries
/// `[Bold, Italic]` in exactly that ancestor order, and the renderer wraps
/// commands in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    Bold,
    Italic,
    Underline,
}

/// A contiguous span of text sharing one active style chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRun {
    pub text: String,
    /// Active styles in nesting (ancestor) order. Empty for plain text.
    pub styles: Vec<Style>,
}

impl StyleRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            styles: Vec::new(),
        }
    }

    pub fn styled(text: impl Into<String>, styles: Vec<Style>) -> Self {
        Self {
            text: text.into(),
            styles,
        }
    }
}

/// One unit of inline content inside a paragraph or heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inline {
    /// Styled text.
    Run(StyleRun),
    /// A citation marker; renders as a citation command for `source`.
    Citation { source: String },
    /// A cross-reference marker; renders as a reference command for `target`.
    CrossRef { target: String },
}

/// An embedded image block as it appears in a section.
///
/// Carries the raw editor-supplied fields; validation (URL scheme, required
/// fields) happens in the image collector, not here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageBlock {
    pub image_id: String,
    pub image_url: String,
    pub image_name: String,
    pub caption: String,
    pub alignment: Alignment,
    /// Id of the document (paper or section) that owns the binary.
    pub owner_doc_id: String,
}

/// Horizontal placement of a figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

/// A typed unit of document structure within a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Paragraph { content: Vec<Inline> },
    Heading { level: u8, content: Vec<Inline> },
    Image(ImageBlock),
}

/// One section of a paper: an ordered sequence of blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: u64,
    pub name: String,
    pub content: Vec<Block>,
    /// Set when section extraction hit a non-fatal problem (malformed
    /// fragment, dropped elements). The section still renders.
    pub error: Option<String>,
}

impl Section {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            content: Vec::new(),
            error: None,
        }
    }
}

// ── Paper metadata ───────────────────────────────────────────────────────

/// One author line for the title block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub affiliation: Option<String>,
    pub email: Option<String>,
}

/// Title-block metadata fetched from the paper store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaperMeta {
    pub title: String,
    pub authors: Vec<Author>,
    /// Funding acknowledgements, rendered as title footnotes.
    pub funding: Vec<String>,
}

/// One citation source record from the store; becomes one BibTeX entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CitationSource {
    /// Cite key, e.g. "Smith2020". Must match the markers in the text.
    pub key: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<u16>,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
}

// ── Document configuration ───────────────────────────────────────────────

/// Per-document LaTeX preamble knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOptions {
    /// LaTeX document class, e.g. "article".
    pub document_class: String,
    /// Font size option, e.g. "11pt".
    pub font_size: String,
    /// Paper size option, e.g. "a4paper".
    pub paper_size: String,
    /// Template identifier selecting additional preamble packages.
    pub template: Option<String>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            document_class: "article".to_string(),
            font_size: "11pt".to_string(),
            paper_size: "a4paper".to_string(),
            template: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_run_constructors() {
        let plain = StyleRun::plain("x");
        assert!(plain.styles.is_empty());
        let styled = StyleRun::styled("x", vec![Style::Bold, Style::Italic]);
        assert_eq!(styled.styles, vec![Style::Bold, Style::Italic]);
    }

    #[test]
    fn alignment_default_is_center() {
        assert_eq!(Alignment::default(), Alignment::Center);
    }

    #[test]
    fn document_options_defaults() {
        let opts = DocumentOptions::default();
        assert_eq!(opts.document_class, "article");
        assert_eq!(opts.font_size, "11pt");
        assert_eq!(opts.paper_size, "a4paper");
        assert!(opts.template.is_none());
    }
}
