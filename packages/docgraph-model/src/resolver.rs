//! Repository-wide reference resolution over tree-sitter syntax trees.
//!
//! Given a name and its defining position, finds every position in the
//! repository that mentions the same identifier, filtered by a scope check
//! in the origin file and an import-path heuristic across files. Resolution
//! is best-effort: unreadable or unparsable files are logged and skipped,
//! never fatal.

use crate::lang::Language;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};
use walkdir::WalkDir;

/// A resolution request: find everything that references `name`, defined
/// at `line`/`column` of `file` (repo-relative, 1-based line, 0-based
/// column).
#[derive(Debug, Clone)]
pub struct RefQuery {
    pub file: String,
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub in_file_only: bool,
}

/// One referencing position. `file` is repo-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefHit {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Stateful resolver with per-language parser reuse and a parsed-source
/// cache. Intended for a single analysis pass; construct fresh when the
/// working tree changes.
pub struct ReferenceResolver {
    repo_root: PathBuf,
    similarity_threshold: f64,
    parsers: HashMap<Language, Parser>,
    sources: HashMap<PathBuf, Rc<(Tree, String)>>,
}

impl ReferenceResolver {
    pub fn new(repo_root: impl Into<PathBuf>, similarity_threshold: f64) -> Self {
        Self {
            repo_root: repo_root.into(),
            similarity_threshold,
            parsers: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    /// Resolve a query to the positions that reference it. The origin
    /// position itself is never part of the result.
    pub fn resolve(&mut self, query: &RefQuery) -> Vec<RefHit> {
        let Some(lang) = Language::from_path(Path::new(&query.file)) else {
            debug!("unsupported file type: {}", query.file);
            return Vec::new();
        };
        let abs = self.repo_root.join(&query.file);
        let Some(parsed) = self.parse_source(&abs, lang) else {
            return Vec::new();
        };
        let (tree, code) = &*parsed;

        let Some(found) = identifier_at(tree.root_node(), code, lang, query.line, query.column)
        else {
            warn!(
                "no identifier at {}:{}:{}",
                query.file, query.line, query.column
            );
            return Vec::new();
        };
        if found != query.name {
            warn!(
                "identifier mismatch at {}:{}:{}: expected {}, found {}",
                query.file, query.line, query.column, query.name, found
            );
        }

        let mut hits = if query.in_file_only {
            self.find_in_file(&query.file, &found, (query.line, query.column), true)
        } else {
            self.find_in_repo(&query.file, &found, (query.line, query.column), lang)
        };
        hits.retain(|h| {
            !(h.file == query.file && h.line == query.line && h.column == query.column)
        });
        hits
    }

    /// All matches of `name` in one file. When `filter_scope` is set,
    /// plain usages are kept only when they share an enclosing scope with
    /// the origin position; definition-context matches always survive.
    fn find_in_file(
        &mut self,
        rel_path: &str,
        name: &str,
        origin: (u32, u32),
        filter_scope: bool,
    ) -> Vec<RefHit> {
        let Some(lang) = Language::from_path(Path::new(rel_path)) else {
            return Vec::new();
        };
        let abs = self.repo_root.join(rel_path);
        let Some(parsed) = self.parse_source(&abs, lang) else {
            return Vec::new();
        };
        let (tree, code) = &*parsed;
        let root = tree.root_node();

        let matches = collect_identifiers(root, code, lang, name);
        let origin_scope = enclosing_scope_id(root, lang, origin.0, origin.1);

        let mut hits = Vec::new();
        for m in matches {
            if filter_scope && !m.is_definition {
                let scope = enclosing_scope_id(root, lang, m.line, m.column);
                if scope != origin_scope {
                    continue;
                }
            }
            hits.push(RefHit {
                file: rel_path.to_string(),
                line: m.line,
                column: m.column,
            });
        }
        hits
    }

    /// Repository-wide search: same-language files first, then the rest,
    /// each in path order; then the import-path filter against the origin
    /// file's imports.
    fn find_in_repo(
        &mut self,
        origin_file: &str,
        name: &str,
        origin: (u32, u32),
        origin_lang: Language,
    ) -> Vec<RefHit> {
        let mut candidates: Vec<(u8, String)> = Vec::new();
        for entry in WalkDir::new(&self.repo_root)
            .into_iter()
            .filter_entry(|e| {
                !(e.depth() > 0
                    && e.file_name()
                        .to_str()
                        .map(|n| n.starts_with('.'))
                        .unwrap_or(false))
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(lang) = Language::from_path(entry.path()) else {
                continue;
            };
            let Ok(rel) = entry.path().strip_prefix(&self.repo_root) else {
                continue;
            };
            let priority = if lang == origin_lang { 0 } else { 1 };
            candidates.push((priority, rel.to_string_lossy().replace('\\', "/")));
        }
        candidates.sort();

        let mut all = Vec::new();
        for (_, rel) in candidates {
            let filter_scope = rel == origin_file;
            all.extend(self.find_in_file(&rel, name, origin, filter_scope));
        }
        self.filter_by_imports(all, origin_file)
    }

    /// Drop cross-file hits that the origin file's imports cannot plausibly
    /// explain. Same-file hits always pass; so does everything when the
    /// origin has no imports at all, or when a candidate file fails to
    /// parse (fail open).
    fn filter_by_imports(&mut self, hits: Vec<RefHit>, origin_file: &str) -> Vec<RefHit> {
        if hits.is_empty() {
            return hits;
        }
        let Some(origin_lang) = Language::from_path(Path::new(origin_file)) else {
            return hits;
        };
        let abs_origin = self.repo_root.join(origin_file);
        let Some(parsed) = self.parse_source(&abs_origin, origin_lang) else {
            return hits;
        };
        let (tree, code) = &*parsed;
        let imports = extract_imports(tree.root_node(), code, origin_lang);
        if imports.is_empty() {
            return hits;
        }

        let mut by_file: HashMap<String, Vec<RefHit>> = HashMap::new();
        let mut file_order = Vec::new();
        for hit in hits {
            if !by_file.contains_key(&hit.file) {
                file_order.push(hit.file.clone());
            }
            by_file.entry(hit.file.clone()).or_default().push(hit);
        }

        let mut kept = Vec::new();
        for file in file_order {
            let file_hits = by_file.remove(&file).unwrap_or_default();
            if file == origin_file {
                kept.extend(file_hits);
                continue;
            }
            let Some(lang) = Language::from_path(Path::new(&file)) else {
                continue;
            };
            let abs = self.repo_root.join(&file);
            let Some(parsed) = self.parse_source(&abs, lang) else {
                kept.extend(file_hits);
                continue;
            };
            let (tree, code) = &*parsed;
            let module = module_path(&file);
            for hit in file_hits {
                let (class_name, func_name) =
                    function_context(tree.root_node(), code, lang, hit.line, hit.column);
                let mut paths = Vec::new();
                if let (Some(class), Some(func)) = (&class_name, &func_name) {
                    paths.push(format!("{}.{}.{}", module, class, func));
                }
                if let Some(func) = &func_name {
                    paths.push(format!("{}.{}", module, func));
                }
                paths.push(module.clone());
                let matched = paths
                    .iter()
                    .any(|p| import_match(&imports, p, self.similarity_threshold));
                if matched {
                    kept.push(hit);
                }
            }
        }
        kept
    }

    fn parse_source(&mut self, path: &Path, lang: Language) -> Option<Rc<(Tree, String)>> {
        if let Some(cached) = self.sources.get(path) {
            return Some(Rc::clone(cached));
        }
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                debug!("cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        if !self.parsers.contains_key(&lang) {
            let mut parser = Parser::new();
            if let Err(e) = parser.set_language(&lang.grammar()) {
                warn!("grammar init failed for {}: {}", lang.name(), e);
                return None;
            }
            self.parsers.insert(lang, parser);
        }
        let parser = self.parsers.get_mut(&lang)?;
        let tree = match parser.parse(&source, None) {
            Some(t) => t,
            None => {
                warn!("parse failed: {}", path.display());
                return None;
            }
        };
        let entry = Rc::new((tree, source));
        self.sources.insert(path.to_path_buf(), Rc::clone(&entry));
        Some(entry)
    }
}

struct IdentifierMatch {
    line: u32,
    column: u32,
    is_definition: bool,
}

fn node_text(node: Node, code: &str) -> Option<String> {
    node.utf8_text(code.as_bytes()).ok().map(str::to_string)
}

/// Position containment: 1-based line, 0-based column, half-open on the
/// end column.
fn node_contains_position(node: &Node, row: usize, col: usize) -> bool {
    let start = node.start_position();
    let end = node.end_position();
    if !(start.row <= row && row <= end.row) {
        return false;
    }
    if start.row == row && start.column > col {
        return false;
    }
    if end.row == row && end.column <= col {
        return false;
    }
    true
}

/// Deepest node covering the position. Children of a syntax node are
/// disjoint, so a greedy descent suffices.
fn node_at_position(root: Node, line: u32, column: u32) -> Option<Node> {
    let row = line.checked_sub(1)? as usize;
    let col = column as usize;
    if !node_contains_position(&root, row, col) {
        return None;
    }
    let mut now = root;
    'descend: loop {
        let mut cursor = now.walk();
        for child in now.children(&mut cursor) {
            if node_contains_position(&child, row, col) {
                now = child;
                continue 'descend;
            }
        }
        return Some(now);
    }
}

/// Identifier text at a position: the node itself, the nearest covering
/// identifier ancestor, or the first identifier in the subtree.
fn identifier_at(root: Node, code: &str, lang: Language, line: u32, column: u32) -> Option<String> {
    let node = node_at_position(root, line, column)?;
    let id_types = lang.identifier_types();
    if id_types.contains(node.kind()) {
        return node_text(node, code);
    }

    let row = (line - 1) as usize;
    let col = column as usize;
    let mut current = node.parent();
    while let Some(n) = current {
        if id_types.contains(n.kind())
            && n.start_position().row <= row
            && row <= n.end_position().row
            && n.start_position().column <= col
            && col <= n.end_position().column
        {
            return node_text(n, code);
        }
        current = n.parent();
    }

    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if id_types.contains(n.kind()) {
            return node_text(n, code);
        }
        let mut cursor = n.walk();
        let children: Vec<Node> = n.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    None
}

/// Every occurrence of `name` as an identifier node, with its context
/// classification.
fn collect_identifiers(root: Node, code: &str, lang: Language, name: &str) -> Vec<IdentifierMatch> {
    let id_types = lang.identifier_types();
    let mut matches = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if id_types.contains(node.kind()) {
            if let Some(text) = node_text(node, code) {
                if text == name {
                    matches.push(IdentifierMatch {
                        line: node.start_position().row as u32 + 1,
                        column: node.start_position().column as u32,
                        is_definition: in_definition_context(node, lang),
                    });
                }
            }
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    // stack order already yields pre-order, but make position order explicit
    matches.sort_by_key(|m| (m.line, m.column));
    matches
}

/// An identifier sits in a definition context when any ancestor is one of
/// the language's definition node types.
fn in_definition_context(node: Node, lang: Language) -> bool {
    let def_types = lang.definition_types();
    let mut current = node.parent();
    while let Some(n) = current {
        if def_types.contains(n.kind()) {
            return true;
        }
        current = n.parent();
    }
    false
}

/// Stable id of the innermost scope node covering a position; the root id
/// when the position is at module level.
fn enclosing_scope_id(root: Node, lang: Language, line: u32, column: u32) -> Option<usize> {
    let node = node_at_position(root, line, column)?;
    let scope_types = lang.scope_types();
    let mut current = Some(node);
    while let Some(n) = current {
        if scope_types.contains(n.kind()) {
            return Some(n.id());
        }
        current = n.parent();
    }
    Some(root.id())
}

/// Import paths declared in a file, normalized to dotted strings.
fn extract_imports(root: Node, code: &str, lang: Language) -> Vec<String> {
    let mut imports = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match (lang, node.kind()) {
            (Language::Python, "import_statement") => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    match child.kind() {
                        "dotted_name" | "aliased_import" => {
                            let target = if child.kind() == "aliased_import" {
                                child.child_by_field_name("name")
                            } else {
                                Some(child)
                            };
                            if let Some(text) = target.and_then(|t| node_text(t, code)) {
                                imports.push(text);
                            }
                        }
                        _ => {}
                    }
                }
            }
            (Language::Python, "import_from_statement") => {
                let module = node
                    .child_by_field_name("module_name")
                    .and_then(|m| node_text(m, code));
                if let Some(module) = module {
                    let mut cursor = node.walk();
                    for name in node.children_by_field_name("name", &mut cursor) {
                        if let Some(text) = node_text(name, code) {
                            imports.push(format!("{}.{}", module, text));
                        }
                    }
                }
            }
            (Language::Java, "import_declaration") => {
                if let Some(text) = node_text(node, code) {
                    let cleaned = text
                        .trim_start_matches("import")
                        .trim_start_matches(" static")
                        .trim_end_matches(';')
                        .trim()
                        .to_string();
                    if !cleaned.is_empty() {
                        imports.push(cleaned);
                    }
                }
            }
            (Language::Go, "import_spec") => {
                if let Some(path) = node.child_by_field_name("path") {
                    if let Some(text) = node_text(path, code) {
                        imports.push(text.trim_matches('"').to_string());
                    }
                }
            }
            (Language::Kotlin, "import_header") => {
                if let Some(text) = node_text(node, code) {
                    let cleaned = text.trim_start_matches("import").trim().to_string();
                    if !cleaned.is_empty() {
                        imports.push(cleaned);
                    }
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    imports
}

/// Class and function names enclosing a position, for building candidate
/// import paths.
fn function_context(
    root: Node,
    code: &str,
    lang: Language,
    line: u32,
    column: u32,
) -> (Option<String>, Option<String>) {
    let Some(node) = node_at_position(root, line, column) else {
        return (None, None);
    };
    let mut class_name = None;
    let mut function_name = None;
    let mut current = Some(node);
    while let Some(n) = current {
        let kind = n.kind();
        let is_function = matches!(
            (lang, kind),
            (Language::Python, "function_definition")
                | (Language::Java, "method_declaration")
                | (Language::Go, "function_declaration")
                | (Language::Go, "method_declaration")
                | (Language::Kotlin, "function_declaration")
        );
        let is_class = matches!(
            (lang, kind),
            (Language::Python, "class_definition")
                | (Language::Java, "class_declaration")
                | (Language::Kotlin, "class_declaration")
        );
        if is_function && function_name.is_none() {
            function_name = definition_name(n, code, lang);
        }
        if is_class && class_name.is_none() {
            class_name = definition_name(n, code, lang);
        }
        current = n.parent();
    }
    (class_name, function_name)
}

fn definition_name(node: Node, code: &str, lang: Language) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return node_text(name, code);
    }
    // kotlin grammars expose the name as a bare child, not a field
    let mut cursor = node.walk();
    let wanted = lang.identifier_types();
    let found = node
        .children(&mut cursor)
        .find(|c| wanted.contains(c.kind()) || c.kind() == "type_identifier");
    found.and_then(|c| node_text(c, code))
}

/// Repo-relative path rendered as a dotted module path without extension.
fn module_path(rel_path: &str) -> String {
    let without_ext = match rel_path.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => rel_path,
    };
    without_ext.replace('/', ".")
}

/// Fuzzy membership of `target` in the import set: exact, dotted-prefix in
/// either direction, or normalized edit distance above the threshold.
fn import_match(imports: &[String], target: &str, threshold: f64) -> bool {
    let target_parts: Vec<&str> = target.split('.').collect();
    for import in imports {
        if import == target {
            return true;
        }
        let import_parts: Vec<&str> = import.split('.').collect();
        if target_parts.len() >= import_parts.len()
            && target_parts[..import_parts.len()] == import_parts[..]
        {
            return true;
        }
        if import_parts.len() >= target_parts.len()
            && import_parts[..target_parts.len()] == target_parts[..]
        {
            return true;
        }
        if strsim::normalized_levenshtein(target, import) >= threshold {
            return true;
        }
    }
    false
}
