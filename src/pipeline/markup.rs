//! Markup rendering: the block tree → a complete LaTeX source string.
//!
//! The renderer is a pure function of its inputs: sections, the resolved
//! image map, document options, and paper metadata in; one markup string
//! and the set of images actually referenced out. Nothing here touches the
//! filesystem or the network, which keeps every rendering rule unit-testable
//! with plain strings.
//!
//! ## Degradation rules
//!
//! The target language is stricter than the source model, so the renderer
//! follows the same skip-don't-fail policy as extraction: an image whose
//! bytes never resolved becomes a source comment instead of a broken
//! `\includegraphics`; a heading deeper than LaTeX supports is capped at
//! the deepest sectioning command rather than dropped.

use crate::document::{
    Alignment, Block, CitationSource, DocumentOptions, Inline, PaperMeta, Section, Style, StyleRun,
};
use crate::output::RenderOutput;
use crate::pipeline::images::ResolvedImages;
use tracing::debug;

/// Stem of the bibliography file the rendered document expects next to it.
pub const BIB_STEM: &str = "references";

/// Sectioning commands by heading level, deepest last. Levels beyond the
/// end of this list are capped at the last entry.
const SECTIONING: [&str; 4] = ["section", "subsection", "subsubsection", "paragraph"];

/// Render the full LaTeX document for a paper.
pub fn render_document(
    sections: &[Section],
    images: &ResolvedImages,
    options: &DocumentOptions,
    meta: &PaperMeta,
) -> RenderOutput {
    let mut out = String::with_capacity(4096);
    let mut referenced_images = Vec::new();
    let has_citations = sections.iter().any(section_has_citation);

    render_preamble(&mut out, options, meta);
    out.push_str("\\begin{document}\n");
    if !meta.title.is_empty() {
        out.push_str("\\maketitle\n\n");
    }

    for section in sections {
        if !section.name.is_empty() {
            out.push_str(&format!("\\section{{{}}}\n", escape_latex(&section.name)));
        }
        for block in &section.content {
            render_block(&mut out, block, images, &mut referenced_images);
        }
        out.push('\n');
    }

    if has_citations {
        out.push_str(&format!(
            "\\bibliographystyle{{plain}}\n\\bibliography{{{BIB_STEM}}}\n"
        ));
    }
    out.push_str("\\end{document}\n");

    debug!(
        "Rendered {} section(s), {} referenced image(s), citations={}",
        sections.len(),
        referenced_images.len(),
        has_citations
    );

    RenderOutput {
        markup: out,
        referenced_images,
        has_citations,
        suggested_filename: "main.tex".to_string(),
    }
}

fn render_preamble(out: &mut String, options: &DocumentOptions, meta: &PaperMeta) {
    out.push_str(&format!(
        "\\documentclass[{},{}]{{{}}}\n",
        options.font_size, options.paper_size, options.document_class
    ));
    out.push_str("\\usepackage[utf8]{inputenc}\n");
    out.push_str("\\usepackage{graphicx}\n");
    out.push_str("\\usepackage[normalem]{ulem}\n");
    for pkg in template_packages(options.template.as_deref()) {
        out.push_str(&format!("\\usepackage{{{pkg}}}\n"));
    }

    if !meta.title.is_empty() {
        let mut title = escape_latex(&meta.title);
        for funding in &meta.funding {
            title.push_str(&format!("\\thanks{{{}}}", escape_latex(funding)));
        }
        out.push_str(&format!("\\title{{{title}}}\n"));

        let authors: Vec<String> = meta
            .authors
            .iter()
            .map(|a| {
                let mut s = escape_latex(&a.name);
                if let Some(ref aff) = a.affiliation {
                    s.push_str(&format!(" \\\\ {}", escape_latex(aff)));
                }
                if let Some(ref email) = a.email {
                    s.push_str(&format!(" \\\\ \\texttt{{{}}}", escape_latex(email)));
                }
                s
            })
            .collect();
        if !authors.is_empty() {
            out.push_str(&format!("\\author{{{}}}\n", authors.join(" \\and ")));
        }
    }
    out.push('\n');
}

/// Extra preamble packages by template id. Unknown templates render as a
/// comment so the choice stays visible in the source.
fn template_packages(template: Option<&str>) -> Vec<&'static str> {
    match template {
        None | Some("plain") => vec![],
        Some("math") => vec!["amsmath", "amssymb"],
        Some("linked") => vec!["hyperref"],
        Some(_) => vec![],
    }
}

fn render_block(
    out: &mut String,
    block: &Block,
    images: &ResolvedImages,
    referenced: &mut Vec<String>,
) {
    match block {
        Block::Paragraph { content } => {
            if content.is_empty() {
                return;
            }
            for inline in content {
                out.push_str(&render_inline(inline));
            }
            out.push_str("\n\n");
        }
        Block::Heading { level, content } => {
            let idx = (level.max(&1) - 1) as usize;
            let cmd = SECTIONING[idx.min(SECTIONING.len() - 1)];
            let body: String = content.iter().map(|i| render_inline(i)).collect();
            out.push_str(&format!("\\{cmd}{{{body}}}\n\n"));
        }
        Block::Image(img) => render_figure(out, img, images, referenced),
    }
}

fn render_inline(inline: &Inline) -> String {
    match inline {
        Inline::Run(run) => render_run(run),
        Inline::Citation { source } => format!("\\cite{{{}}}", sanitize_key(source)),
        Inline::CrossRef { target } => format!("\\ref{{{}}}", sanitize_key(target)),
    }
}

/// Marker keys pass into command arguments verbatim — full escaping would
/// break BibTeX key matching — so only characters that terminate or corrupt
/// the argument are removed.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '{' | '}' | '%' | '\\' | '#') && !c.is_control())
        .collect()
}

/// Wrap a run's escaped text in formatting commands matching its recorded
/// style order: `[Bold, Italic]` → `\textbf{\textit{…}}`.
fn render_run(run: &StyleRun) -> String {
    let mut body = escape_latex(&run.text);
    for style in run.styles.iter().rev() {
        let cmd = match style {
            Style::Bold => "textbf",
            Style::Italic => "textit",
            Style::Underline => "uline",
        };
        body = format!("\\{cmd}{{{body}}}");
    }
    body
}

fn render_figure(
    out: &mut String,
    img: &crate::document::ImageBlock,
    images: &ResolvedImages,
    referenced: &mut Vec<String>,
) {
    // The collector keys by safe id; an image block whose reference was
    // dropped or never resolved degrades to a comment.
    let entry = images
        .images
        .iter()
        .find(|(_, r)| r.id == img.image_id && r.payload.is_some());

    let Some((safe_id, image_ref)) = entry else {
        out.push_str(&format!(
            "% image '{}' unavailable, figure skipped\n\n",
            img.image_id.replace('\n', " ")
        ));
        return;
    };

    referenced.push(safe_id.clone());

    let (open, close) = match img.alignment {
        Alignment::Center => ("\\centering\n", ""),
        Alignment::Left => ("\\begin{flushleft}\n", "\\end{flushleft}\n"),
        Alignment::Right => ("\\begin{flushright}\n", "\\end{flushright}\n"),
    };

    out.push_str("\\begin{figure}[htbp]\n");
    out.push_str(open);
    out.push_str(&format!(
        "\\includegraphics[width=0.8\\textwidth]{{{}}}\n",
        image_ref.filename
    ));
    if !img.caption.is_empty() {
        out.push_str(&format!("\\caption{{{}}}\n", escape_latex(&img.caption)));
    }
    out.push_str(&format!("\\label{{fig:{safe_id}}}\n"));
    out.push_str(close);
    out.push_str("\\end{figure}\n\n");
}

fn section_has_citation(section: &Section) -> bool {
    section.content.iter().any(|b| match b {
        Block::Paragraph { content } | Block::Heading { content, .. } => content
            .iter()
            .any(|i| matches!(i, Inline::Citation { .. })),
        Block::Image(_) => false,
    })
}

/// Escape LaTeX special characters in user text.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' => out.push_str("\\&"),
            '%' => out.push_str("\\%"),
            '$' => out.push_str("\\$"),
            '#' => out.push_str("\\#"),
            '_' => out.push_str("\\_"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

// ── Bibliography ─────────────────────────────────────────────────────────

/// Generate BibTeX entries one-to-one from citation source records,
/// preserving input order.
pub fn render_bibliography(sources: &[CitationSource]) -> String {
    let mut out = String::with_capacity(sources.len() * 160);
    for source in sources {
        let entry_type = if source.journal.is_some() {
            "article"
        } else {
            "misc"
        };
        out.push_str(&format!("@{entry_type}{{{},\n", sanitize_key(&source.key)));
        if !source.authors.is_empty() {
            out.push_str(&format!(
                "  author = {{{}}},\n",
                source
                    .authors
                    .iter()
                    .map(|a| escape_latex(a))
                    .collect::<Vec<_>>()
                    .join(" and ")
            ));
        }
        out.push_str(&format!("  title = {{{}}},\n", escape_latex(&source.title)));
        if let Some(year) = source.year {
            out.push_str(&format!("  year = {{{year}}},\n"));
        }
        if let Some(ref journal) = source.journal {
            out.push_str(&format!("  journal = {{{}}},\n", escape_latex(journal)));
        }
        if let Some(ref volume) = source.volume {
            out.push_str(&format!("  volume = {{{}}},\n", escape_latex(volume)));
        }
        if let Some(ref pages) = source.pages {
            out.push_str(&format!("  pages = {{{}}},\n", escape_latex(pages)));
        }
        if let Some(ref doi) = source.doi {
            out.push_str(&format!("  doi = {{{doi}}},\n"));
        }
        if let Some(ref url) = source.url {
            out.push_str(&format!("  url = {{{url}}},\n"));
        }
        out.push_str("}\n\n");
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────
