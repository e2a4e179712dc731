//! File chunking: AST-preferred with a sliding-window fallback.

use tree_sitter::{Language, Node, Parser};

/// A contiguous slice of a file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk content.
    pub content: String,
    /// Start line, 0-based.
    pub start_line: usize,
    /// End line.
    pub end_line: usize,
    /// Chunk kind: `heuristic`, `function`, `class`, `method`, `interface`,
    /// or `enum`.
    pub chunk_type: String,
    /// Byte offset of the chunk start. Exact for AST chunks,
    /// line-accumulated for heuristic ones.
    pub start_offset: usize,
    /// Byte offset of the chunk end.
    pub end_offset: usize,
}

/// A code element extracted alongside an AST chunk.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    /// Symbol name.
    pub name: String,
    /// Symbol kind, same vocabulary as chunk kinds.
    pub kind: String,
    /// Start line, 0-based.
    pub start_line: usize,
    /// Start column.
    pub start_col: usize,
    /// End line.
    pub end_line: usize,
    /// End column.
    pub end_col: usize,
    /// First line of the definition.
    pub signature: Option<String>,
    /// Enclosing symbol's qualified name.
    pub parent_qualname: Option<String>,
    /// Index of the chunk emitted for this symbol.
    pub chunk_index: Option<usize>,
}

impl SymbolInfo {
    /// Dotted qualified name.
    pub fn qualified_name(&self) -> String {
        match &self.parent_qualname {
            Some(parent) => format!("{}.{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

/// Chunking output. `symbols` is empty on the fallback path.
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    /// The chunks.
    pub chunks: Vec<Chunk>,
    /// Extracted symbols, when an AST was available.
    pub symbols: Vec<SymbolInfo>,
}

/// Map a file extension to a language name.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    Some(match ext {
        "py" => "python",
        "js" | "jsx" | "mjs" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "rs" => "rust",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "md" => "markdown",
        "txt" => "text",
        "rst" => "restructuredtext",
        _ => return None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sliding-Window Chunker
// ─────────────────────────────────────────────────────────────────────────────

/// Default window size in lines.
pub const DEFAULT_WINDOW: usize = 50;

/// Default overlap in lines.
pub const DEFAULT_OVERLAP: usize = 10;

/// Sliding-window chunker used when no parser applies.
#[derive(Debug, Clone)]
pub struct SlidingChunker {
    window: usize,
    overlap: usize,
}

impl Default for SlidingChunker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_OVERLAP)
    }
}

impl SlidingChunker {
    /// Create a chunker. `overlap` must be smaller than `window`.
    pub fn new(window: usize, overlap: usize) -> Self {
        debug_assert!(overlap < window);
        Self { window, overlap }
    }

    /// Chunk content into overlapping line windows. Empty content yields no
    /// chunks; blank windows are skipped.
    pub fn chunk_file(&self, content: &str) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = content.split('\n').collect();
        let total = lines.len();
        let step = self.window - self.overlap;
        let mut chunks = Vec::new();

        let mut i = 0;
        while i < total {
            let end = (i + self.window).min(total);
            let window_lines = &lines[i..end];
            let chunk_content = window_lines.join("\n");

            if !chunk_content.trim().is_empty() {
                let start_offset: usize = lines[..i].iter().map(|line| line.len() + 1).sum();
                chunks.push(Chunk {
                    content: chunk_content.clone(),
                    start_line: i,
                    end_line: end,
                    chunk_type: "heuristic".to_string(),
                    start_offset,
                    end_offset: start_offset + chunk_content.len(),
                });
            }

            if end >= total {
                break;
            }
            i += step;
        }

        chunks
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AST Chunker
// ─────────────────────────────────────────────────────────────────────────────

/// AST chunker backed by tree-sitter, falling back to [`SlidingChunker`]
/// when no grammar applies or a parse yields no symbols.
#[derive(Debug, Clone, Default)]
pub struct AstChunker {
    fallback: SlidingChunker,
}

impl AstChunker {
    /// Create a chunker with the default fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk a file, emitting one chunk and one symbol per definition node
    /// when a grammar is available.
    pub fn chunk_file(&self, content: &str, language: Option<&str>) -> ChunkResult {
        if content.is_empty() {
            return ChunkResult::default();
        }

        let Some(grammar) = language.and_then(load_grammar) else {
            return self.fallback_result(content);
        };

        let mut parser = Parser::new();
        if parser.set_language(&grammar.language).is_err() {
            return self.fallback_result(content);
        }
        let Some(tree) = parser.parse(content, None) else {
            return self.fallback_result(content);
        };

        let mut result = ChunkResult::default();
        collect_symbols(
            tree.root_node(),
            content.as_bytes(),
            grammar.targets,
            None,
            &mut result,
        );

        if result.chunks.is_empty() {
            return self.fallback_result(content);
        }
        result
    }

    fn fallback_result(&self, content: &str) -> ChunkResult {
        ChunkResult {
            chunks: self.fallback.chunk_file(content),
            symbols: Vec::new(),
        }
    }
}

struct Grammar {
    language: Language,
    /// (node kind, symbol kind) pairs this grammar emits.
    targets: &'static [(&'static str, &'static str)],
}

fn load_grammar(language: &str) -> Option<Grammar> {
    match language {
        "python" => Some(Grammar {
            language: tree_sitter_python::LANGUAGE.into(),
            targets: &[
                ("function_definition", "function"),
                ("class_definition", "class"),
            ],
        }),
        "javascript" => Some(Grammar {
            language: tree_sitter_javascript::LANGUAGE.into(),
            targets: JS_TARGETS,
        }),
        "typescript" => Some(Grammar {
            language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            targets: JS_TARGETS,
        }),
        "tsx" => Some(Grammar {
            language: tree_sitter_typescript::LANGUAGE_TSX.into(),
            targets: JS_TARGETS,
        }),
        "rust" => Some(Grammar {
            language: tree_sitter_rust::LANGUAGE.into(),
            targets: &[
                ("function_item", "function"),
                ("struct_item", "class"),
                ("enum_item", "enum"),
                ("trait_item", "interface"),
            ],
        }),
        _ => None,
    }
}

const JS_TARGETS: &[(&str, &str)] = &[
    ("function_declaration", "function"),
    ("class_declaration", "class"),
    ("method_definition", "method"),
    ("interface_declaration", "interface"),
    ("enum_declaration", "enum"),
];

fn collect_symbols(
    node: Node<'_>,
    source: &[u8],
    targets: &'static [(&'static str, &'static str)],
    parent_qualname: Option<&str>,
    result: &mut ChunkResult,
) {
    let node_kind = node.kind();
    let target = targets.iter().find(|(kind, _)| *kind == node_kind);

    let mut next_parent: Option<String> = parent_qualname.map(str::to_string);
    if let Some((_, symbol_kind)) = target {
        if let Some(name) = symbol_name(node, source) {
            let chunk_text = String::from_utf8_lossy(&source[node.start_byte()..node.end_byte()]);
            if !chunk_text.trim().is_empty() {
                let signature = chunk_text.lines().next().map(|line| line.trim().to_string());
                result.chunks.push(Chunk {
                    content: chunk_text.to_string(),
                    start_line: node.start_position().row,
                    end_line: node.end_position().row,
                    chunk_type: symbol_kind.to_string(),
                    start_offset: node.start_byte(),
                    end_offset: node.end_byte(),
                });
                let symbol = SymbolInfo {
                    name: name.clone(),
                    kind: symbol_kind.to_string(),
                    start_line: node.start_position().row,
                    start_col: node.start_position().column,
                    end_line: node.end_position().row,
                    end_col: node.end_position().column,
                    signature,
                    parent_qualname: parent_qualname.map(str::to_string),
                    chunk_index: Some(result.chunks.len() - 1),
                };
                next_parent = Some(symbol.qualified_name());
                result.symbols.push(symbol);
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_symbols(child, source, targets, next_parent.as_deref(), result);
    }
}

fn symbol_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    let name_node = node.child_by_field_name("name")?;
    name_node.utf8_text(source).ok().map(str::to_string)
}
