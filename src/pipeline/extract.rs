//! Content tree extraction: serialized section fragment → block descriptors.
//!
//! Each section of a paper arrives as an XML fragment — the serialized form
//! of the collaborative editor's node tree:
//!
//! ```xml
//! <blockgroup>
//!   <block><paragraph>Hello <bold>wor<italic>ld</italic></bold></paragraph></block>
//!   <block><heading level="2">Intro</heading></block>
//!   <block><image-block id="img1" src="https://…" name="Fig 1" caption="…"/></block>
//! </blockgroup>
//! ```
//!
//! Extraction never fails: malformed fragments, unknown block containers,
//! and unreadable attributes are logged, recorded as diagnostics, and
//! skipped, so one broken element cannot lose a whole section. The closed
//! [`Block`] dispatch with an explicit unrecognized arm is deliberate —
//! silent data loss from unchecked dynamic dispatch is the failure mode
//! this module exists to prevent.
//!
//! Inline walking flattens styled subtrees into [`StyleRun`]s whose style
//! set is the full active ancestor chain in nesting order. Two special
//! elements rewrite directly to markers: `<table-ref>` → cross-reference,
//! `<source-ref>` → citation.

use crate::document::{Alignment, Block, ImageBlock, Inline, Section, Style, StyleRun};
use crate::pipeline::diagnostics::Diagnostic;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

/// Extract one section's block sequence from its serialized fragment.
///
/// Returns the section plus any diagnostics for dropped or malformed
/// elements. The section's `error` field summarises the diagnostics so a
/// caller holding only sections still sees that something was skipped.
pub fn extract_section(id: u64, name: &str, fragment: &str) -> (Section, Vec<Diagnostic>) {
    let mut section = Section::new(id, name);
    let mut diags = Vec::new();

    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(false);

    // Locate the root grouping element, tolerating leading junk.
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"blockgroup" => {
                extract_blocks(&mut reader, &mut section, &mut diags);
                break;
            }
            Ok(Event::Eof) => {
                if !fragment.trim().is_empty() {
                    let d = Diagnostic::warning(
                        format!("section '{name}': no <blockgroup> root found"),
                        fragment.chars().take(80).collect::<String>(),
                    );
                    warn!("{}", d.message);
                    diags.push(d);
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                let d = Diagnostic::warning(
                    format!("section '{name}': malformed fragment: {e}"),
                    String::new(),
                );
                warn!("{}", d.message);
                diags.push(d);
                break;
            }
        }
    }

    if !diags.is_empty() {
        section.error = Some(format!("{} element(s) dropped during extraction", diags.len()));
    }
    debug!(
        "Extracted section '{}': {} blocks, {} diagnostics",
        name,
        section.content.len(),
        diags.len()
    );
    (section, diags)
}

/// Walk children of `<blockgroup>` until its end tag, classifying each
/// `<block>` container by its recognized inner element.
fn extract_blocks(reader: &mut Reader<&[u8]>, section: &mut Section, diags: &mut Vec<Diagnostic>) {
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"block" => {
                extract_block(reader, section, diags);
            }
            Ok(Event::Start(ref e)) => {
                let tag = tag_name(e);
                diags.push(dropped(&section.name, &tag));
                skip_subtree(reader, &tag);
            }
            Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"block" {
                    // Same treatment as <block></block> with no content.
                    diags.push(empty_block(&section.name));
                } else {
                    diags.push(dropped(&section.name, &tag_name(e)));
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"blockgroup" => break,
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => {
                diags.push(Diagnostic::warning(
                    format!("section '{}': malformed fragment: {e}", section.name),
                    String::new(),
                ));
                break;
            }
        }
    }
}

/// Classify one `<block>` container. Exactly one recognized inner element
/// produces a block; anything else produces a diagnostic and no block.
fn extract_block(reader: &mut Reader<&[u8]>, section: &mut Section, diags: &mut Vec<Diagnostic>) {
    let mut produced = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"paragraph" => {
                    let content = extract_inlines(reader, "paragraph", &mut Vec::new(), diags);
                    section.content.push(Block::Paragraph { content });
                    produced = true;
                }
                b"heading" => {
                    let level = attr(e, "level")
                        .and_then(|v| v.parse::<u8>().ok())
                        .unwrap_or(1);
                    let content = extract_inlines(reader, "heading", &mut Vec::new(), diags);
                    section.content.push(Block::Heading { level, content });
                    produced = true;
                }
                b"image-block" => {
                    section.content.push(Block::Image(image_block(e)));
                    produced = true;
                    skip_subtree(reader, "image-block");
                }
                _ => {
                    let tag = tag_name(e);
                    diags.push(dropped(&section.name, &tag));
                    skip_subtree(reader, &tag);
                }
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"paragraph" => {
                    section.content.push(Block::Paragraph { content: vec![] });
                    produced = true;
                }
                b"heading" => {
                    let level = attr(e, "level")
                        .and_then(|v| v.parse::<u8>().ok())
                        .unwrap_or(1);
                    section.content.push(Block::Heading {
                        level,
                        content: vec![],
                    });
                    produced = true;
                }
                b"image-block" => {
                    section.content.push(Block::Image(image_block(e)));
                    produced = true;
                }
                _ => diags.push(dropped(&section.name, &tag_name(e))),
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"block" => break,
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => {
                diags.push(Diagnostic::warning(
                    format!("section '{}': malformed block: {e}", section.name),
                    String::new(),
                ));
                break;
            }
        }
    }

    if !produced {
        diags.push(empty_block(&section.name));
    }
}

fn empty_block(section: &str) -> Diagnostic {
    Diagnostic::warning(
        format!("section '{section}': <block> without recognized content dropped"),
        String::new(),
    )
}

/// Flatten the inline subtree of `parent` into runs and markers.
///
/// `chain` is the active style stack; entering a styling element pushes for
/// the duration of its subtree. Unknown inline elements recurse
/// transparently so their text is not lost.
fn extract_inlines(
    reader: &mut Reader<&[u8]>,
    parent: &str,
    chain: &mut Vec<Style>,
    diags: &mut Vec<Diagnostic>,
) -> Vec<Inline> {
    let mut content = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(ref t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                if !text.is_empty() {
                    content.push(Inline::Run(StyleRun::styled(text, chain.clone())));
                }
            }
            Ok(Event::Start(ref e)) => {
                let tag = tag_name(e);
                match style_for(&tag) {
                    Some(style) => {
                        // Repeated ancestors collapse: bold inside bold is
                        // still just bold.
                        let pushed = !chain.contains(&style);
                        if pushed {
                            chain.push(style);
                        }
                        content.extend(extract_inlines(reader, &tag, chain, diags));
                        if pushed {
                            chain.pop();
                        }
                    }
                    None => match tag.as_str() {
                        "table-ref" => {
                            let target = marker_name(reader, e, &tag);
                            content.push(Inline::CrossRef { target });
                        }
                        "source-ref" => {
                            let source = marker_name(reader, e, &tag);
                            content.push(Inline::Citation { source });
                        }
                        // Unknown inline wrapper: descend without styling.
                        _ => content.extend(extract_inlines(reader, &tag, chain, diags)),
                    },
                }
            }
            Ok(Event::Empty(ref e)) => {
                let tag = tag_name(e);
                match tag.as_str() {
                    "table-ref" => content.push(Inline::CrossRef {
                        target: attr(e, "target")
                            .or_else(|| attr(e, "name"))
                            .unwrap_or_default(),
                    }),
                    "source-ref" => content.push(Inline::Citation {
                        source: attr(e, "name")
                            .or_else(|| attr(e, "target"))
                            .unwrap_or_default(),
                    }),
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) if tag_name_end(e.name().as_ref()) == parent => break,
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => {
                diags.push(Diagnostic::warning(
                    format!("malformed inline content under <{parent}>: {e}"),
                    String::new(),
                ));
                break;
            }
        }
    }

    content
}

/// Marker name from the element's attribute, falling back to its escape
/// text (inner text content).
fn marker_name(reader: &mut Reader<&[u8]>, e: &BytesStart<'_>, tag: &str) -> String {
    let from_attr = attr(e, "target").or_else(|| attr(e, "name"));
    let mut text = String::new();
    // Consume the subtree either way so the reader stays positioned.
    loop {
        match reader.read_event() {
            Ok(Event::Text(ref t)) => text.push_str(&t.unescape().unwrap_or_default()),
            Ok(Event::End(ref end)) if tag_name_end(end.name().as_ref()) == tag => break,
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    from_attr.unwrap_or_else(|| text.trim().to_string())
}

fn image_block(e: &BytesStart<'_>) -> ImageBlock {
    ImageBlock {
        image_id: attr(e, "id").unwrap_or_default(),
        image_url: attr(e, "src").or_else(|| attr(e, "url")).unwrap_or_default(),
        image_name: attr(e, "name").unwrap_or_default(),
        caption: attr(e, "caption").unwrap_or_default(),
        alignment: match attr(e, "align").as_deref() {
            Some("left") => Alignment::Left,
            Some("right") => Alignment::Right,
            _ => Alignment::Center,
        },
        owner_doc_id: attr(e, "owner-doc").unwrap_or_default(),
    }
}

fn style_for(tag: &str) -> Option<Style> {
    match tag {
        "bold" => Some(Style::Bold),
        "italic" => Some(Style::Italic),
        "underline" => Some(Style::Underline),
        _ => None,
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn tag_name_end(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Skip everything up to and including the end tag of `tag`.
fn skip_subtree(reader: &mut Reader<&[u8]>, tag: &str) {
    let mut depth = 0u32;
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if tag_name(e) == tag => depth += 1,
            Ok(Event::End(ref e)) if tag_name_end(e.name().as_ref()) == tag => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

fn dropped(section: &str, tag: &str) -> Diagnostic {
    let d = Diagnostic::warning(
        format!("section '{section}': unrecognized element <{tag}> dropped"),
        format!("<{tag}>"),
    );
    warn!("{}", d.message);
    d
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(fragment: &str) -> (Vec<Block>, Vec<Diagnostic>) {
        let (section, diags) = extract_section(1, "test", fragment);
        (section.content, diags)
    }

    #[test]
    fn nested_styles_flatten_in_ancestor_order() {
        let (content, diags) = blocks(
            "<blockgroup><block><paragraph><bold><italic>x</italic></bold></paragraph></block></blockgroup>",
        );
        assert!(diags.is_empty());
        let Block::Paragraph { content } = &content[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(
            content,
            &vec![Inline::Run(StyleRun::styled(
                "x",
                vec![Style::Bold, Style::Italic]
            ))]
        );
    }

    #[test]
    fn text_before_and_after_styled_span() {
        let (content, _) = blocks(
            "<blockgroup><block><paragraph>a<bold>b</bold>c</paragraph></block></blockgroup>",
        );
        let Block::Paragraph { content } = &content[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(
            content,
            &vec![
                Inline::Run(StyleRun::plain("a")),
                Inline::Run(StyleRun::styled("b", vec![Style::Bold])),
                Inline::Run(StyleRun::plain("c")),
            ]
        );
    }

    #[test]
    fn heading_level_from_attribute() {
        let (content, _) = blocks(
            "<blockgroup><block><heading level=\"2\">Intro</heading></block></blockgroup>",
        );
        assert_eq!(
            content[0],
            Block::Heading {
                level: 2,
                content: vec![Inline::Run(StyleRun::plain("Intro"))],
            }
        );
    }

    #[test]
    fn heading_level_defaults_to_one() {
        let (content, _) =
            blocks("<blockgroup><block><heading>Top</heading></block></blockgroup>");
        assert!(matches!(content[0], Block::Heading { level: 1, .. }));
    }

    #[test]
    fn citation_and_crossref_markers() {
        let (content, _) = blocks(
            "<blockgroup><block><paragraph>see <source-ref name=\"Smith2020\"/> and \
             <table-ref target=\"tab:results\"/></paragraph></block></blockgroup>",
        );
        let Block::Paragraph { content } = &content[0] else {
            panic!("expected paragraph");
        };
        assert!(content.contains(&Inline::Citation {
            source: "Smith2020".into()
        }));
        assert!(content.contains(&Inline::CrossRef {
            target: "tab:results".into()
        }));
    }

    #[test]
    fn marker_escape_text_fallback() {
        let (content, _) = blocks(
            "<blockgroup><block><paragraph><source-ref>Jones1999</source-ref></paragraph></block></blockgroup>",
        );
        let Block::Paragraph { content } = &content[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(
            content,
            &vec![Inline::Citation {
                source: "Jones1999".into()
            }]
        );
    }

    #[test]
    fn image_block_attributes() {
        let (content, _) = blocks(
            "<blockgroup><block><image-block id=\"img1\" src=\"https://x.test/a.png\" \
             name=\"Fig 1\" caption=\"A figure\" align=\"right\" owner-doc=\"42\"/></block></blockgroup>",
        );
        let Block::Image(img) = &content[0] else {
            panic!("expected image");
        };
        assert_eq!(img.image_id, "img1");
        assert_eq!(img.image_url, "https://x.test/a.png");
        assert_eq!(img.alignment, Alignment::Right);
        assert_eq!(img.owner_doc_id, "42");
    }

    #[test]
    fn unrecognized_block_dropped_with_diagnostic() {
        let (content, diags) = blocks(
            "<blockgroup><block><mystery><paragraph>hidden</paragraph></mystery></block>\
             <block><paragraph>kept</paragraph></block></blockgroup>",
        );
        assert_eq!(content.len(), 1);
        // One for the <mystery> element, one for the empty container.
        assert_eq!(diags.len(), 2);
        assert!(diags[0].message.contains("mystery"));
    }

    #[test]
    fn unknown_inline_wrapper_keeps_text() {
        let (content, diags) = blocks(
            "<blockgroup><block><paragraph><highlight>kept</highlight></paragraph></block></blockgroup>",
        );
        assert!(diags.is_empty());
        let Block::Paragraph { content } = &content[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(content, &vec![Inline::Run(StyleRun::plain("kept"))]);
    }

    #[test]
    fn empty_block_diagnostic_regardless_of_form() {
        let (self_closing, d1) = blocks("<blockgroup><block/></blockgroup>");
        let (expanded, d2) = blocks("<blockgroup><block></block></blockgroup>");
        assert!(self_closing.is_empty());
        assert!(expanded.is_empty());
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].message, d2[0].message);
        assert!(d1[0].message.contains("without recognized content"));
    }

    #[test]
    fn empty_group_yields_empty_section() {
        let (section, diags) = extract_section(1, "empty", "<blockgroup></blockgroup>");
        assert!(section.content.is_empty());
        assert!(diags.is_empty());
        assert!(section.error.is_none());
    }

    #[test]
    fn malformed_fragment_never_panics() {
        let (section, diags) =
            extract_section(1, "bad", "<blockgroup><block><paragraph>unclosed");
        // Whatever was parsed survives; the failure is a diagnostic.
        assert!(section.content.len() <= 1);
        let _ = diags;
    }

    #[test]
    fn extraction_is_idempotent() {
        let fragment = "<blockgroup><block><heading level=\"3\">H</heading></block>\
             <block><paragraph>a<bold>b</bold><source-ref name=\"K\"/></paragraph></block></blockgroup>";
        let (first, _) = extract_section(7, "s", fragment);
        let (second, _) = extract_section(7, "s", fragment);
        assert_eq!(first, second);
    }

    #[test]
    fn entity_text_is_unescaped() {
        let (content, _) = blocks(
            "<blockgroup><block><paragraph>a &amp; b</paragraph></block></blockgroup>",
        );
        let Block::Paragraph { content } = &content[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(content, &vec![Inline::Run(StyleRun::plain("a & b"))]);
    }
}
