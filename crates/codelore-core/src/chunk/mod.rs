//! Content chunking.
//!
//! Files are routed by extension to a [`ContentCategory`], and each category
//! has exactly one chunker:
//!
//! | Category | Chunker |
//! |----------|---------|
//! | `Code(lang)` | [`code::chunk_code`] (tree-sitter query) |
//! | `Markdown` | [`text::chunk_markdown`] (heading sections, paragraph fallback) |
//! | `PlainText` | [`text::chunk_paragraphs`] |
//! | `Unsupported` | none |
//!
//! [`chunk_file`] never returns an empty list: when the category has no
//! chunker, or the chunker yields nothing, the whole file becomes one
//! [`ChunkKind::Block`] chunk so it stays retrievable.

pub mod code;
pub mod text;

use std::path::Path;

use crate::models::{ChunkDraft, ChunkKind};

/// Languages with a syntax-tree chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Rust,
}

/// Closed set of content categories, one chunker each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Code(Language),
    Markdown,
    PlainText,
    Unsupported,
}

impl ContentCategory {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "js" | "jsx" | "mjs" | "cjs" => ContentCategory::Code(Language::JavaScript),
            "ts" | "mts" | "cts" => ContentCategory::Code(Language::TypeScript),
            "tsx" => ContentCategory::Code(Language::Tsx),
            "py" => ContentCategory::Code(Language::Python),
            "rs" => ContentCategory::Code(Language::Rust),
            "md" | "markdown" | "mdx" => ContentCategory::Markdown,
            "txt" | "text" | "rst" | "adoc" => ContentCategory::PlainText,
            _ => ContentCategory::Unsupported,
        }
    }
}

/// Chunk a file's content according to its category.
pub fn chunk_file(path: &str, content: &str) -> Vec<ChunkDraft> {
    let chunks = match ContentCategory::from_path(path) {
        ContentCategory::Code(lang) => code::chunk_code(content, lang),
        ContentCategory::Markdown => text::chunk_markdown(content),
        ContentCategory::PlainText => text::chunk_paragraphs(content),
        ContentCategory::Unsupported => Vec::new(),
    };

    if chunks.is_empty() {
        vec![whole_file_chunk(path, content)]
    } else {
        chunks
    }
}

/// A single chunk spanning the entire content, named after the file.
pub fn whole_file_chunk(path: &str, content: &str) -> ChunkDraft {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    ChunkDraft {
        name,
        kind: ChunkKind::Block,
        content: content.to_string(),
        start_line: 1,
        end_line: content.lines().count().max(1),
    }
}

/// 1-indexed line number of a byte offset.
pub(crate) fn line_of(content: &str, byte_offset: usize) -> usize {
    let end = byte_offset.min(content.len());
    content.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}
