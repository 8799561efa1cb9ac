//! Markdown and plain-text chunkers.
//!
//! Markdown is parsed into events with `pulldown-cmark`. Every heading of
//! depth 1-3 opens a new section; everything after it (body text and deeper
//! headings) belongs to that section until the next one opens. Text before
//! the first heading forms its own section.
//!
//! When that yields a single section and the document has body content, the
//! section is re-split on blank lines instead, dropping fragments shorter
//! than [`MIN_PARAGRAPH_CHARS`]. Plain text always takes the paragraph path.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use super::line_of;
use crate::models::{ChunkDraft, ChunkKind};

/// Paragraph fragments shorter than this (in chars, trimmed) are discarded.
pub const MIN_PARAGRAPH_CHARS: usize = 40;

const MAX_SECTION_DEPTH: usize = 3;
const MAX_PARAGRAPH_NAME_CHARS: usize = 60;
const PREAMBLE_NAME: &str = "preamble";

struct Section {
    start: usize,
    title: String,
}

/// Split markdown into heading-bounded sections, with paragraph fallback.
pub fn chunk_markdown(content: &str) -> Vec<ChunkDraft> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut heading: Option<String> = None;
    let mut has_body = false;

    for (event, range) in Parser::new(content).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) if level as usize <= MAX_SECTION_DEPTH => {
                heading = Some(String::new());
                sections.push(Section {
                    start: range.start,
                    title: String::new(),
                });
            }
            Event::End(TagEnd::Heading(level)) if level as usize <= MAX_SECTION_DEPTH => {
                if let (Some(title), Some(section)) = (heading.take(), sections.last_mut()) {
                    section.title = title.trim().to_string();
                }
            }
            Event::Text(t) | Event::Code(t) if heading.is_some() => {
                if let Some(title) = heading.as_mut() {
                    title.push_str(&t);
                }
            }
            Event::End(_) => {}
            _ if heading.is_none() => has_body = true,
            _ => {}
        }
    }

    let first_heading = sections.first().map(|s| s.start).unwrap_or(content.len());
    let mut spans: Vec<(usize, usize, String)> = Vec::new();
    if !content[..first_heading].trim().is_empty() {
        spans.push((0, first_heading, PREAMBLE_NAME.to_string()));
    }
    for (i, section) in sections.iter().enumerate() {
        let end = sections.get(i + 1).map(|s| s.start).unwrap_or(content.len());
        let title = if section.title.is_empty() {
            "untitled section".to_string()
        } else {
            section.title.clone()
        };
        spans.push((section.start, end, title));
    }

    let chunks: Vec<ChunkDraft> = spans
        .into_iter()
        .filter_map(|(start, end, name)| section_chunk(content, start, end, name))
        .collect();

    if chunks.len() == 1 && has_body {
        let only = &chunks[0];
        let paragraphs = split_paragraphs(&only.content, only.start_line, MIN_PARAGRAPH_CHARS);
        if !paragraphs.is_empty() {
            return paragraphs;
        }
    }

    chunks
}

/// Split plain text on blank lines, dropping short fragments.
pub fn chunk_paragraphs(content: &str) -> Vec<ChunkDraft> {
    split_paragraphs(content, 1, MIN_PARAGRAPH_CHARS)
}

fn section_chunk(content: &str, start: usize, end: usize, name: String) -> Option<ChunkDraft> {
    let raw = &content[start..end];
    let leading = raw.len() - raw.trim_start().len();
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let text_start = start + leading;
    Some(ChunkDraft {
        name,
        kind: ChunkKind::Block,
        content: text.to_string(),
        start_line: line_of(content, text_start),
        end_line: line_of(content, text_start + text.len()),
    })
}

fn split_paragraphs(text: &str, first_line: usize, min_chars: usize) -> Vec<ChunkDraft> {
    let mut chunks = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut start_line = first_line;
    let mut last_line = first_line;

    for (i, line) in text.lines().enumerate() {
        let line_no = first_line + i;
        if line.trim().is_empty() {
            flush_paragraph(&mut buf, start_line, last_line, min_chars, &mut chunks);
            continue;
        }
        if buf.is_empty() {
            start_line = line_no;
        }
        buf.push(line);
        last_line = line_no;
    }
    flush_paragraph(&mut buf, start_line, last_line, min_chars, &mut chunks);

    chunks
}

fn flush_paragraph(
    buf: &mut Vec<&str>,
    start_line: usize,
    end_line: usize,
    min_chars: usize,
    out: &mut Vec<ChunkDraft>,
) {
    if buf.is_empty() {
        return;
    }
    let paragraph = buf.join("\n");
    buf.clear();

    let trimmed = paragraph.trim();
    if trimmed.chars().count() < min_chars {
        return;
    }

    let name: String = trimmed
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(MAX_PARAGRAPH_NAME_CHARS)
        .collect();

    out.push(ChunkDraft {
        name,
        kind: ChunkKind::Block,
        content: trimmed.to_string(),
        start_line,
        end_line,
    });
}
