//! Compiler log parsing: raw TeX output → structured diagnostics.
//!
//! ## Why parse the log at all?
//!
//! The LaTeX engine reports everything — fatal errors, recoverable errors,
//! warnings, page numbers — interleaved on stdout/in the .log file, and its
//! exit code says almost nothing about whether a usable PDF was produced.
//! Structured [`Diagnostic`] records let callers show users *what* went
//! wrong on *which line* without shipping them a 400-line transcript.
//!
//! Two independent pattern families are scanned in one ordered pass:
//!
//! * **Hard errors** — a line starting with the engine's `!` marker or a
//!   `file.tex:line:` prefix; following lines accumulate into the message
//!   until a blank line or the next marker. Line numbers come from the
//!   `:N:` prefix or a trailing `l.N` context line.
//! * **Warnings** — `LaTeX Warning:` / `Package … Warning:` lines with an
//!   optional `on input line N` suffix.
//!
//! Parsing is tolerant by construction: no matches → empty vector, never an
//! error. Ordering follows discovery order, not severity.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Severity of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Error,
    Warning,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// A structured error/warning extracted from compiler output.
///
/// Independent of overall job outcome: a successful compile can carry
/// dozens of these, and a failed one can carry none (e.g. the engine
/// binary was missing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Source line, when the log names one.
    pub line: Option<u32>,
    pub message: String,
    /// The raw log line(s) the record was extracted from.
    pub context: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            line: None,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn warning(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            line: None,
            message: message.into(),
            context: context.into(),
        }
    }
}

// ── Pattern family (a): hard errors ──────────────────────────────────────

/// `file.tex:123: Undefined control sequence` style (file-line-error mode).
static RE_FILE_LINE_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:\s]+\.\w+):(\d+):\s*(.*)$").unwrap());

/// Context line the engine prints under an error: `l.42 \badmacro`.
static RE_CONTEXT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^l\.(\d+)").unwrap());

/// `... on input line 42` / `... line 42` inside a message.
static RE_INLINE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bline\s+(\d+)").unwrap());

// ── Pattern family (b): warnings ─────────────────────────────────────────

/// `LaTeX Warning: …` and `Package natbib Warning: …`.
static RE_WARNING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:LaTeX|Package\s+\S+|Class\s+\S+|pdfTeX)\s+[Ww]arning:?\s*(.*)$").unwrap()
});

/// Extract ordered diagnostics from raw compiler stdout and/or log content.
///
/// Order follows discovery order. An input with no recognizable markers
/// yields an empty vector.
pub fn parse_log(log: &str) -> Vec<Diagnostic> {
    let lines: Vec<&str> = log.lines().collect();
    let mut diags = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        // `!` marker errors: `! Undefined control sequence.`
        if let Some(rest) = line.strip_prefix('!') {
            let (message, line_no, consumed) = collect_error_message(rest.trim(), &lines[i + 1..]);
            diags.push(Diagnostic {
                kind: DiagnosticKind::Error,
                line: line_no,
                message,
                context: lines[i..i + 1 + consumed].join("\n"),
            });
            i += 1 + consumed;
            continue;
        }

        // `file.tex:42: message` errors
        if let Some(caps) = RE_FILE_LINE_ERROR.captures(line) {
            let explicit_line = caps[2].parse::<u32>().ok();
            let (message, trailing_line, consumed) =
                collect_error_message(caps[3].trim(), &lines[i + 1..]);
            diags.push(Diagnostic {
                kind: DiagnosticKind::Error,
                line: explicit_line.or(trailing_line),
                message,
                context: lines[i..i + 1 + consumed].join("\n"),
            });
            i += 1 + consumed;
            continue;
        }

        // Warnings are single-line with an optional line suffix
        if let Some(caps) = RE_WARNING.captures(line) {
            let message = caps[1].trim().to_string();
            let line_no = RE_INLINE_LINE
                .captures(line)
                .and_then(|c| c[1].parse::<u32>().ok());
            diags.push(Diagnostic {
                kind: DiagnosticKind::Warning,
                line: line_no,
                message,
                context: line.to_string(),
            });
            i += 1;
            continue;
        }

        i += 1;
    }

    diags
}

/// Accumulate an error message from its first line plus following lines,
/// stopping at a blank line or the next marker. Returns the message, any
/// line number found in the body, and the count of extra lines consumed.
fn collect_error_message(first: &str, rest: &[&str]) -> (String, Option<u32>, usize) {
    let mut message = first.to_string();
    let mut line_no = RE_INLINE_LINE
        .captures(first)
        .and_then(|c| c[1].parse::<u32>().ok());
    let mut consumed = 0;

    for next in rest {
        let trimmed = next.trim();
        if trimmed.is_empty() || is_marker(trimmed) {
            break;
        }
        consumed += 1;
        if let Some(caps) = RE_CONTEXT_LINE.captures(trimmed) {
            line_no = line_no.or_else(|| caps[1].parse::<u32>().ok());
            // The `l.N` context line ends the message body.
            break;
        }
        if !message.is_empty() {
            message.push(' ');
        }
        message.push_str(trimmed);
    }

    (message, line_no, consumed)
}

fn is_marker(line: &str) -> bool {
    line.starts_with('!') || RE_FILE_LINE_ERROR.is_match(line) || RE_WARNING.is_match(line)
}

// ── Human-readable transcript ────────────────────────────────────────────

/// Installation-path noise the transcript drops: TeX distributions echo
/// every opened file, burying the lines a user actually needs.
static RE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^\(/ |                         # file-stack open noise: (/usr/share/...
        /usr/(share|local|lib)/tex |   # installation paths
        texmf(-dist)? |
        ^This\ is\ (pdfTeX|XeTeX|LuaTeX) |
        ^Document\ Class: |
        ^LaTeX2e\ < |
        ^\*\* |
        ^entering\ extended\ mode",
    )
    .unwrap()
});

static RE_OUTPUT_WRITTEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Output written on\s+(.*)$").unwrap());

/// Produce a display-only transcript from raw compiler output.
///
/// Strips known installation-path prefixes and engine boilerplate, and
/// labels recognized classes (`error:` / `warning:` / `output:`). This is
/// for human eyes; diagnostics extraction always runs on the raw log via
/// [`parse_log`].
pub fn format_transcript(log: &str) -> String {
    let mut out = String::with_capacity(log.len() / 2);

    for line in log.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() || RE_NOISE.is_match(trimmed) {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix('!') {
            out.push_str("error: ");
            out.push_str(rest.trim());
        } else if let Some(caps) = RE_WARNING.captures(trimmed) {
            out.push_str("warning: ");
            out.push_str(caps[1].trim());
        } else if let Some(caps) = RE_OUTPUT_WRITTEN.captures(trimmed) {
            out.push_str("output: ");
            out.push_str(caps[1].trim());
        } else {
            out.push_str(trimmed);
        }
        out.push('\n');
    }

    out
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "\
This is pdfTeX, Version 3.141592653-2.6-1.40.24
(/usr/share/texlive/texmf-dist/tex/latex/base/article.cls
Document Class: article 2021/10/04 v1.4n Standard LaTeX document class
! Undefined control sequence.
l.12 \\badmacro
    {oops}

LaTeX Warning: Reference `fig:one' on page 1 undefined on input line 34.

Package natbib Warning: Citation `Smith2020' on page 2 undefined on input line 51.

main.tex:77: Missing $ inserted.

Output written on main.pdf (3 pages, 61234 bytes).
";

    #[test]
    fn parses_bang_error_with_context_line() {
        let diags = parse_log(SAMPLE_LOG);
        let first = &diags[0];
        assert_eq!(first.kind, DiagnosticKind::Error);
        assert_eq!(first.line, Some(12));
        assert!(first.message.contains("Undefined control sequence"));
        assert!(first.context.contains("l.12"));
    }

    #[test]
    fn parses_warnings_with_line_suffix() {
        let diags = parse_log(SAMPLE_LOG);
        let warnings: Vec<_> = diags
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].line, Some(34));
        assert!(warnings[0].message.contains("fig:one"));
        assert_eq!(warnings[1].line, Some(51));
        assert!(warnings[1].message.contains("Smith2020"));
    }

    #[test]
    fn parses_file_line_error() {
        let diags = parse_log(SAMPLE_LOG);
        let file_err = diags
            .iter()
            .find(|d| d.message.contains("Missing $"))
            .expect("file:line error parsed");
        assert_eq!(file_err.kind, DiagnosticKind::Error);
        assert_eq!(file_err.line, Some(77));
    }

    #[test]
    fn discovery_order_preserved() {
        let diags = parse_log(SAMPLE_LOG);
        let kinds: Vec<DiagnosticKind> = diags.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::Error,
                DiagnosticKind::Warning,
                DiagnosticKind::Warning,
                DiagnosticKind::Error,
            ]
        );
    }

    #[test]
    fn empty_and_clean_logs_yield_no_diagnostics() {
        assert!(parse_log("").is_empty());
        assert!(parse_log("all quiet\nnothing to see\n").is_empty());
    }

    #[test]
    fn error_message_accumulates_until_blank_line() {
        let log = "! LaTeX Error: File `figs/x.png' not found.\nSee the LaTeX manual.\nType H for help.\n\nunrelated";
        let diags = parse_log(log);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("not found"));
        assert!(diags[0].message.contains("Type H for help"));
        assert!(!diags[0].message.contains("unrelated"));
    }

    #[test]
    fn transcript_strips_noise_and_labels_classes() {
        let t = format_transcript(SAMPLE_LOG);
        assert!(!t.contains("texmf-dist"));
        assert!(!t.contains("This is pdfTeX"));
        assert!(t.contains("error: Undefined control sequence"));
        assert!(t.contains("warning: Reference `fig:one'"));
        assert!(t.contains("output: main.pdf"));
    }

    #[test]
    fn transcript_of_empty_log_is_empty() {
        assert_eq!(format_transcript(""), "");
    }
}
