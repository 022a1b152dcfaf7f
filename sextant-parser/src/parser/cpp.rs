//! C/C++ extractor using tree-sitter.
//!
//! Records `#include` edges and namespace/class-qualified functions, types
//! and variables. Symbols with internal linkage (`static` at namespace scope,
//! anonymous namespaces) are left out: they never collide across binaries.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tree_sitter::Node;
use xxhash_rust::xxh3::xxh3_64;

use sextant_core::lang::detect_language;
use sextant_core::{
    BuildAction, File, FileId, ParseHandle, ParseResult, Symbol, SymbolKind, SymbolRole,
};

use super::helpers::{compact_text, get_node_text, has_child_text, normalize_path};
use super::{ParseContext, Parser, ParserOptions};
use crate::parse::ParseStats;
use crate::storage::{Database, StatRow};

/// One `#include` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub path: String,
    /// `<...>` form
    pub system: bool,
}

/// A symbol as found in the source, before it is tied to a file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub role: SymbolRole,
}

impl ExtractedSymbol {
    pub fn to_symbol(&self, file_id: FileId) -> Symbol {
        Symbol {
            mangled_hash: mangled_hash(self.kind, &self.name),
            name: self.name.clone(),
            kind: self.kind,
            role: self.role,
            file_id,
        }
    }
}

/// Everything extracted from one translation unit or header.
#[derive(Debug, Default)]
pub struct Extraction {
    pub includes: Vec<IncludeDirective>,
    pub symbols: Vec<ExtractedSymbol>,
}

/// Stable identity of a qualified entity of a given kind.
pub fn mangled_hash(kind: SymbolKind, qualified_name: &str) -> i64 {
    xxh3_64(format!("{}:{}", kind.as_str(), qualified_name).as_bytes()) as i64
}

/// Parse C/C++ source code.
pub fn extract(source: &str) -> Result<Extraction, String> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_cpp::LANGUAGE.into())
        .map_err(|e| format!("Failed to set C++ language: {}", e))?;

    let tree = parser
        .parse(source, None)
        .ok_or("Failed to parse C++ source")?;

    let mut extraction = Extraction::default();
    let mut scope = Vec::new();
    visit(&tree.root_node(), source, &mut scope, false, &mut extraction);
    Ok(extraction)
}

fn visit(node: &Node, source: &str, scope: &mut Vec<String>, in_class: bool, out: &mut Extraction) {
    match node.kind() {
        "translation_unit" | "declaration_list" | "field_declaration_list" | "preproc_ifdef"
        | "preproc_if" | "preproc_else" | "preproc_elif" | "preproc_elifdef"
        | "template_declaration" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                visit(&child, source, scope, in_class, out);
            }
        }
        "linkage_specification" => {
            if let Some(body) = node.child_by_field_name("body") {
                visit(&body, source, scope, in_class, out);
            }
        }
        "preproc_include" => {
            if let Some(include) = extract_include(node, source) {
                out.includes.push(include);
            }
        }
        "namespace_definition" => {
            // Anonymous namespaces have internal linkage.
            let Some(name) = node.child_by_field_name("name") else {
                return;
            };
            let parts: Vec<String> = compact_text(&name, source)
                .split("::")
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            let depth = parts.len();
            scope.extend(parts);
            if let Some(body) = node.child_by_field_name("body") {
                visit(&body, source, scope, false, out);
            }
            scope.truncate(scope.len() - depth);
        }
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
            extract_type(node, source, scope, out);
        }
        "function_definition" => {
            if !in_class && is_static(node, source) {
                return;
            }
            if let Some(name) = node
                .child_by_field_name("declarator")
                .and_then(|d| declarator_name(&d))
            {
                push_symbol(
                    out,
                    scope,
                    &name,
                    source,
                    SymbolKind::Function,
                    SymbolRole::Definition,
                );
            }
        }
        "declaration" | "field_declaration" => {
            extract_declaration(node, source, scope, in_class, out);
        }
        "type_definition" => {
            if let Some(ty) = node.child_by_field_name("type") {
                visit(&ty, source, scope, in_class, out);
            }
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                if let Some(name) = declarator_name(&declarator) {
                    push_symbol(
                        out,
                        scope,
                        &name,
                        source,
                        SymbolKind::Type,
                        SymbolRole::Definition,
                    );
                }
            }
        }
        "alias_declaration" => {
            if let Some(name) = node.child_by_field_name("name") {
                push_symbol(out, scope, &name, source, SymbolKind::Type, SymbolRole::Definition);
            }
        }
        _ => {}
    }
}

fn extract_include(node: &Node, source: &str) -> Option<IncludeDirective> {
    let path = node.child_by_field_name("path")?;
    let text = get_node_text(&path, source).trim();
    match path.kind() {
        "string_literal" => Some(IncludeDirective {
            path: text.trim_matches('"').to_string(),
            system: false,
        }),
        "system_lib_string" => Some(IncludeDirective {
            path: text.trim_start_matches('<').trim_end_matches('>').to_string(),
            system: true,
        }),
        // `#include MACRO`
        _ => None,
    }
}

fn extract_type(node: &Node, source: &str, scope: &mut Vec<String>, out: &mut Extraction) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    let body = node.child_by_field_name("body");
    let role = if body.is_some() {
        SymbolRole::Definition
    } else {
        SymbolRole::Declaration
    };
    push_symbol(out, scope, &name, source, SymbolKind::Type, role);

    if let Some(body) = body.filter(|_| node.kind() != "enum_specifier") {
        let name = compact_text(&name, source);
        scope.push(name);
        visit(&body, source, scope, true, out);
        scope.pop();
    }
}

fn extract_declaration(
    node: &Node,
    source: &str,
    scope: &mut Vec<String>,
    in_class: bool,
    out: &mut Extraction,
) {
    if let Some(ty) = node.child_by_field_name("type") {
        if matches!(
            ty.kind(),
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
        ) {
            extract_type(&ty, source, scope, out);
        }
    }
    if !in_class && is_static(node, source) {
        return;
    }
    let is_extern = has_child_text(node, "storage_class_specifier", "extern", source);

    let mut cursor = node.walk();
    let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
    for declarator in declarators {
        let Some(name) = declarator_name(&declarator) else {
            continue;
        };
        if declares_function(&declarator) {
            push_symbol(out, scope, &name, source, SymbolKind::Function, SymbolRole::Declaration);
        } else if !in_class {
            // Data members belong to their class, not to the link namespace.
            let role = if is_extern {
                SymbolRole::Declaration
            } else {
                SymbolRole::Definition
            };
            push_symbol(out, scope, &name, source, SymbolKind::Variable, role);
        }
    }
}

fn is_static(node: &Node, source: &str) -> bool {
    has_child_text(node, "storage_class_specifier", "static", source)
}

/// Unwrap pointer, reference, array and function declarators down to the
/// declared name.
fn declarator_name<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    let mut current = *node;
    loop {
        match current.kind() {
            "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
            | "operator_name" | "type_identifier" | "template_function" => return Some(current),
            "function_declarator" | "pointer_declarator" | "reference_declarator"
            | "array_declarator" | "init_declarator" | "attributed_declarator" => {
                current = current.child_by_field_name("declarator")?;
            }
            "parenthesized_declarator" => {
                current = current.named_child(0)?;
            }
            _ => return None,
        }
    }
}

fn declares_function(node: &Node) -> bool {
    let mut current = *node;
    loop {
        match current.kind() {
            "function_declarator" => return true,
            "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
                match current.child_by_field_name("declarator") {
                    Some(inner) => current = inner,
                    None => return false,
                }
            }
            _ => return false,
        }
    }
}

fn push_symbol(
    out: &mut Extraction,
    scope: &[String],
    name: &Node,
    source: &str,
    kind: SymbolKind,
    role: SymbolRole,
) {
    let local = compact_text(name, source);
    if local.is_empty() {
        return;
    }
    let local = local.trim_start_matches("::");
    let name = if scope.is_empty() {
        local.to_string()
    } else {
        format!("{}::{}", scope.join("::"), local)
    };
    out.symbols.push(ExtractedSymbol { name, kind, role });
}

/// Resolve an include directive to an existing file.
///
/// Quoted includes are looked up next to the including file first; both
/// forms then search the include paths in order. Relative include paths are
/// taken relative to the including file's directory.
pub fn resolve_include(
    include: &IncludeDirective,
    including_dir: &Path,
    include_paths: &[PathBuf],
) -> Option<PathBuf> {
    let local = (!include.system).then(|| including_dir.to_path_buf());
    let searched = include_paths.iter().map(|dir| {
        if dir.is_absolute() {
            dir.clone()
        } else {
            including_dir.join(dir)
        }
    });

    local
        .into_iter()
        .chain(searched)
        .map(|dir| normalize_path(&dir.join(&include.path)))
        .find(|candidate| candidate.is_file())
}

/// Built-in parser for C and C++ sources and headers.
///
/// Sources are indexed on the rayon pool. Headers reached through resolved
/// includes are indexed once per run, whichever translation unit gets there
/// first.
#[derive(Default)]
pub struct CppParser {
    headers_seen: Arc<Mutex<HashSet<PathBuf>>>,
    headers_indexed: Arc<AtomicUsize>,
}

impl CppParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Parser for CppParser {
    fn name(&self) -> &str {
        "cpp"
    }

    fn accept(&self, path: &Path) -> bool {
        matches!(
            detect_language(path),
            Some("c" | "c-header" | "cpp" | "cpp-header")
        )
    }

    fn parse(
        &self,
        ctx: &ParseContext<'_>,
        _action: &BuildAction,
        source: &File,
        _target: Option<&File>,
    ) -> ParseHandle {
        let job = IndexJob {
            db: Arc::clone(ctx.db),
            options: ctx.options.clone(),
            headers_seen: Arc::clone(&self.headers_seen),
            headers_indexed: Arc::clone(&self.headers_indexed),
        };
        let file_id = source.id;
        let path = PathBuf::from(&source.path);
        ParseHandle::spawn(move || job.run(file_id, &path))
    }

    fn post_parse(&self, ctx: &ParseContext<'_>, _stats: &ParseStats) -> Result<()> {
        let headers = self.headers_indexed.swap(0, Ordering::Relaxed);
        self.headers_seen.lock().clear();
        tracing::info!("cpp: indexed {} headers", headers);
        ctx.tx
            .put_statistic(&StatRow::new("cpp", "headers", headers as i64))
    }
}

struct IndexJob {
    db: Arc<Database>,
    options: ParserOptions,
    headers_seen: Arc<Mutex<HashSet<PathBuf>>>,
    headers_indexed: Arc<AtomicUsize>,
}

impl IndexJob {
    fn run(&self, file_id: FileId, path: &Path) -> ParseResult {
        let mut pending = match self.index_file(file_id, path) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!("cpp: {:#}", e);
                return ParseResult::Fail;
            }
        };

        while let Some(header) = pending.pop() {
            if !self.headers_seen.lock().insert(header.clone()) {
                continue;
            }
            let header_path = header.to_string_lossy().to_string();
            let indexed = self
                .db
                .transaction(|tx| tx.get_or_create_file(&header_path))
                .and_then(|file| self.index_file(file.id, &header));
            match indexed {
                Ok(more) => {
                    self.headers_indexed.fetch_add(1, Ordering::Relaxed);
                    pending.extend(more);
                }
                Err(e) => tracing::warn!("cpp: skipping header {}: {:#}", header_path, e),
            }
        }
        ParseResult::Success
    }

    /// Index one file and return the headers it includes.
    fn index_file(&self, file_id: FileId, path: &Path) -> Result<Vec<PathBuf>> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let source = String::from_utf8_lossy(&bytes);
        let extraction = extract(&source).map_err(|e| anyhow!("{}: {}", path.display(), e))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut headers = Vec::new();
        for include in &extraction.includes {
            match resolve_include(include, dir, &self.options.include_paths) {
                Some(resolved) => headers.push(resolved),
                None => tracing::debug!("cpp: unresolved include {} in {:?}", include.path, path),
            }
        }

        let symbols: Vec<Symbol> = extraction
            .symbols
            .iter()
            .map(|s| s.to_symbol(file_id))
            .collect();

        self.db.transaction(|tx| {
            let mut included = Vec::with_capacity(headers.len());
            for header in &headers {
                included.push(tx.get_or_create_file(&header.to_string_lossy())?.id);
            }
            tx.replace_includes(file_id, &included)?;
            tx.replace_symbols(file_id, &symbols)
        })?;

        tracing::debug!(
            "cpp: {:?}: {} symbols, {} includes",
            path,
            symbols.len(),
            headers.len()
        );
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_core::BuildActionType;
    use tempfile::TempDir;

    const WIDGET: &str = r#"
#include "widget.h"
#include <vector>

namespace ui {
class Widget {
public:
    void draw();
    int size() const { return 0; }
};

void Widget::draw() {}

int counter = 0;
extern int limit;
int helper(int);
static void hidden() {}
struct Forward;
}
"#;

    fn has(extraction: &Extraction, name: &str, kind: SymbolKind, role: SymbolRole) -> bool {
        extraction
            .symbols
            .iter()
            .any(|s| s.name == name && s.kind == kind && s.role == role)
    }

    #[test]
    fn test_extract_includes() {
        let extraction = extract(WIDGET).unwrap();
        assert_eq!(
            extraction.includes,
            vec![
                IncludeDirective {
                    path: "widget.h".into(),
                    system: false
                },
                IncludeDirective {
                    path: "vector".into(),
                    system: true
                },
            ]
        );
    }

    #[test]
    fn test_extract_qualified_symbols() {
        let e = extract(WIDGET).unwrap();
        assert!(has(&e, "ui::Widget", SymbolKind::Type, SymbolRole::Definition));
        assert!(has(&e, "ui::Widget::draw", SymbolKind::Function, SymbolRole::Declaration));
        assert!(has(&e, "ui::Widget::draw", SymbolKind::Function, SymbolRole::Definition));
        assert!(has(&e, "ui::Widget::size", SymbolKind::Function, SymbolRole::Definition));
        assert!(has(&e, "ui::counter", SymbolKind::Variable, SymbolRole::Definition));
        assert!(has(&e, "ui::limit", SymbolKind::Variable, SymbolRole::Declaration));
        assert!(has(&e, "ui::helper", SymbolKind::Function, SymbolRole::Declaration));
        assert!(has(&e, "ui::Forward", SymbolKind::Type, SymbolRole::Declaration));
        assert!(!e.symbols.iter().any(|s| s.name.contains("hidden")));
    }

    #[test]
    fn test_anonymous_namespace_is_skipped() {
        let e = extract("namespace { int secret = 1; }\nint open = 2;\n").unwrap();
        assert!(has(&e, "open", SymbolKind::Variable, SymbolRole::Definition));
        assert!(!e.symbols.iter().any(|s| s.name.contains("secret")));
    }

    #[test]
    fn test_mangled_hash_separates_kinds() {
        assert_eq!(
            mangled_hash(SymbolKind::Function, "a::b"),
            mangled_hash(SymbolKind::Function, "a::b")
        );
        assert_ne!(
            mangled_hash(SymbolKind::Function, "a::b"),
            mangled_hash(SymbolKind::Type, "a::b")
        );
    }

    #[test]
    fn test_resolve_include_prefers_local_for_quoted() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let inc = dir.path().join("include");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&inc).unwrap();
        std::fs::write(src.join("a.h"), "").unwrap();
        std::fs::write(inc.join("a.h"), "").unwrap();

        let quoted = IncludeDirective {
            path: "a.h".into(),
            system: false,
        };
        let angled = IncludeDirective {
            path: "a.h".into(),
            system: true,
        };
        let paths = vec![inc.clone()];
        assert_eq!(resolve_include(&quoted, &src, &paths), Some(src.join("a.h")));
        assert_eq!(resolve_include(&angled, &src, &paths), Some(inc.join("a.h")));
        assert_eq!(resolve_include(&angled, &src, &[]), None);
    }

    #[test]
    fn test_parse_indexes_source_and_headers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.h"), "#include \"b.h\"\nint shared();\n").unwrap();
        std::fs::write(dir.path().join("b.h"), "#include \"a.h\"\nstruct Point { int x; };\n")
            .unwrap();
        std::fs::write(dir.path().join("a.cpp"), "#include \"a.h\"\nint shared() { return 1; }\n")
            .unwrap();

        let db = Arc::new(Database::open_in_memory().unwrap());
        let parser = CppParser::new();
        let options = ParserOptions::default();
        let source_path = dir.path().join("a.cpp").to_string_lossy().to_string();

        let (source, handle) = db
            .transaction(|tx| {
                let action = tx.insert_action(BuildActionType::Compile, "cc -c a.cpp", "demo")?;
                let source = tx.get_or_create_file(&source_path)?;
                let ctx = ParseContext {
                    tx,
                    options: &options,
                    db: &db,
                };
                let handle = parser.parse(&ctx, &action, &source, None);
                Ok((source, handle))
            })
            .unwrap();
        assert_eq!(handle.wait(), Ok(ParseResult::Success));

        db.transaction(|tx| {
            let symbols = tx.symbols_in_file(source.id)?;
            assert_eq!(symbols.len(), 1);
            assert_eq!(symbols[0].name, "shared");

            let a_h = tx
                .file_by_path(&dir.path().join("a.h").to_string_lossy())?
                .unwrap();
            let b_h = tx
                .file_by_path(&dir.path().join("b.h").to_string_lossy())?
                .unwrap();
            assert!(tx.is_included(a_h.id)?);
            assert!(tx.is_included(b_h.id)?);
            assert_eq!(tx.symbols_in_file(b_h.id)?[0].name, "Point");
            Ok(())
        })
        .unwrap();
        assert_eq!(parser.headers_indexed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unreadable_source_fails() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let parser = CppParser::new();
        let options = ParserOptions::default();
        let handle = db
            .transaction(|tx| {
                let action = tx.insert_action(BuildActionType::Compile, "cc", "demo")?;
                let source = tx.get_or_create_file("/nonexistent/missing.cpp")?;
                let ctx = ParseContext {
                    tx,
                    options: &options,
                    db: &db,
                };
                Ok(parser.parse(&ctx, &action, &source, None))
            })
            .unwrap();
        assert_eq!(handle.wait(), Ok(ParseResult::Fail));
    }
}
