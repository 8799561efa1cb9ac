//! Syntax-aware code chunker.
//!
//! Parses source with tree-sitter and runs a per-language query that
//! captures function, class, method and named arrow-function declarations.
//! Capture names map directly to [`ChunkKind`]s; a captured function nested
//! inside a class-like container is re-tagged as a method.
//!
//! Names are resolved with field heuristics: the `name` field, then the
//! `type` field (Rust `impl` blocks), then the first named child, else
//! `"anonymous"`.
//!
//! An empty result means "no structure found"; [`super::chunk_file`] turns
//! that into a whole-file chunk.

use std::collections::HashSet;

use tree_sitter::{Language as TsLanguage, Node, Parser, Query, QueryCursor};

use super::Language;
use crate::models::{ChunkDraft, ChunkKind};

const JAVASCRIPT_QUERY: &str = r#"
(function_declaration) @function
(generator_function_declaration) @function
(class_declaration) @class
(method_definition) @method
(variable_declarator name: (identifier) value: (arrow_function)) @arrow
"#;

const TYPESCRIPT_QUERY: &str = r#"
(function_declaration) @function
(generator_function_declaration) @function
(class_declaration) @class
(abstract_class_declaration) @class
(method_definition) @method
(variable_declarator name: (identifier) value: (arrow_function)) @arrow
"#;

const PYTHON_QUERY: &str = r#"
(function_definition) @function
(class_definition) @class
"#;

const RUST_QUERY: &str = r#"
(function_item) @function
(impl_item) @class
(struct_item) @class
(enum_item) @class
(trait_item) @class
"#;

/// Node kinds whose nested functions are methods.
const CONTAINER_KINDS: &[&str] = &[
    "class_declaration",
    "abstract_class_declaration",
    "class_body",
    "class_definition",
    "impl_item",
    "trait_item",
];

const MAX_NAME_CHARS: usize = 120;

fn grammar(lang: Language) -> TsLanguage {
    match lang {
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
    }
}

fn query_source(lang: Language) -> &'static str {
    match lang {
        Language::JavaScript => JAVASCRIPT_QUERY,
        Language::TypeScript | Language::Tsx => TYPESCRIPT_QUERY,
        Language::Python => PYTHON_QUERY,
        Language::Rust => RUST_QUERY,
    }
}

fn kind_for_capture(capture: &str) -> ChunkKind {
    match capture {
        "function" => ChunkKind::Function,
        "class" => ChunkKind::Class,
        "method" => ChunkKind::Method,
        "arrow" => ChunkKind::Arrow,
        _ => ChunkKind::Block,
    }
}

/// Extract declaration chunks from `content`. Returns an empty vector when
/// nothing matches or the grammar cannot be loaded.
pub fn chunk_code(content: &str, lang: Language) -> Vec<ChunkDraft> {
    let language = grammar(lang);

    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&language) {
        tracing::warn!(?lang, error = %e, "tree-sitter grammar rejected");
        return Vec::new();
    }
    let Some(tree) = parser.parse(content, None) else {
        return Vec::new();
    };

    let query = match Query::new(&language, query_source(lang)) {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(?lang, error = %e, "invalid chunk query");
            return Vec::new();
        }
    };
    let capture_names = query.capture_names();

    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut captured: Vec<(usize, ChunkDraft)> = Vec::new();

    let mut cursor = QueryCursor::new();
    for m in cursor.matches(&query, tree.root_node(), content.as_bytes()) {
        for capture in m.captures {
            let node = capture.node;
            if !seen.insert((node.start_byte(), node.end_byte())) {
                continue;
            }

            let mut kind = kind_for_capture(&capture_names[capture.index as usize]);
            if kind == ChunkKind::Function && has_container_ancestor(&node) {
                kind = ChunkKind::Method;
            }

            let text = node_text(&node, content);
            if text.trim().is_empty() {
                continue;
            }

            captured.push((
                node.start_byte(),
                ChunkDraft {
                    name: resolve_name(&node, content),
                    kind,
                    content: text.to_string(),
                    start_line: node.start_position().row + 1,
                    end_line: node.end_position().row + 1,
                },
            ));
        }
    }

    captured.sort_by_key(|(start, _)| *start);
    captured.into_iter().map(|(_, chunk)| chunk).collect()
}

fn has_container_ancestor(node: &Node) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if CONTAINER_KINDS.contains(&parent.kind()) {
            return true;
        }
        current = parent.parent();
    }
    false
}

fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    content
        .get(node.start_byte()..node.end_byte())
        .unwrap_or_default()
}

fn resolve_name(node: &Node, content: &str) -> String {
    let candidate = ["name", "type"]
        .iter()
        .find_map(|field| node.child_by_field_name(field))
        .or_else(|| node.named_child(0));

    let name = candidate
        .map(|n| node_text(&n, content))
        .and_then(|t| t.lines().next())
        .map(str::trim)
        .unwrap_or_default();

    if name.is_empty() {
        "anonymous".to_string()
    } else {
        name.chars().take(MAX_NAME_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(chunks: &[ChunkDraft]) -> Vec<(String, ChunkKind, usize, usize)> {
        chunks
            .iter()
            .map(|c| (c.name.clone(), c.kind, c.start_line, c.end_line))
            .collect()
    }

    #[test]
    fn javascript_declarations() {
        let src = "import x from 'y';\n\
export function greet(name) { return name; }\n\
class Greeter {\n\
  constructor() {}\n\
  hello() { return 1; }\n\
}\n\
const add = (a, b) => a + b;\n";
        let chunks = chunk_code(src, Language::JavaScript);
        assert_eq!(
            summary(&chunks),
            vec![
                ("greet".to_string(), ChunkKind::Function, 2, 2),
                ("Greeter".to_string(), ChunkKind::Class, 3, 6),
                ("constructor".to_string(), ChunkKind::Method, 4, 4),
                ("hello".to_string(), ChunkKind::Method, 5, 5),
                ("add".to_string(), ChunkKind::Arrow, 7, 7),
            ]
        );
        assert!(chunks[1].content.starts_with("class Greeter"));
    }

    #[test]
    fn typescript_class_and_function() {
        let src = "export abstract class Store {\n  abstract get(id: string): string;\n}\n\
function load(path: string): number {\n  return 1;\n}\n";
        let chunks = chunk_code(src, Language::TypeScript);
        let names: Vec<&str> = chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Store", "load"]);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[1].kind, ChunkKind::Function);
    }

    #[test]
    fn python_methods_are_tagged() {
        let src = "class Repo:\n    def save(self):\n        pass\n\ndef helper():\n    return 1\n";
        let chunks = chunk_code(src, Language::Python);
        assert_eq!(
            summary(&chunks),
            vec![
                ("Repo".to_string(), ChunkKind::Class, 1, 3),
                ("save".to_string(), ChunkKind::Method, 2, 3),
                ("helper".to_string(), ChunkKind::Function, 5, 6),
            ]
        );
    }

    #[test]
    fn rust_impl_named_after_type() {
        let src = "struct Point { x: i32 }\nimpl Point {\n    fn norm(&self) -> i32 { self.x }\n}\nfn main() {}\n";
        let chunks = chunk_code(src, Language::Rust);
        assert_eq!(
            summary(&chunks),
            vec![
                ("Point".to_string(), ChunkKind::Class, 1, 1),
                ("Point".to_string(), ChunkKind::Class, 2, 4),
                ("norm".to_string(), ChunkKind::Method, 3, 3),
                ("main".to_string(), ChunkKind::Function, 5, 5),
            ]
        );
    }

    #[test]
    fn prose_yields_nothing() {
        assert!(chunk_code("just some words here\n", Language::Python).is_empty());
        assert!(chunk_code("", Language::JavaScript).is_empty());
    }
}
