//! Function-level call graph and its strongly-connected-component
//! condensation.
//!
//! Nodes are bare function names; edges are call sites whose callee does
//! not start with a known platform namespace. The condensation groups
//! mutually recursive functions so downstream consumers can treat each
//! cycle as one documentation unit.

use crate::lang::Language;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};
use walkdir::WalkDir;

/// Where a function is defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Adjacency of one function name.
#[derive(Debug, Clone, Default)]
pub struct CallNode {
    pub calls: BTreeSet<String>,
    pub called_by: BTreeSet<String>,
    pub location: Option<Location>,
}

/// The condensed graph: one entry per strongly connected component, with
/// edges lifted to component ids.
#[derive(Debug, Clone, Default)]
pub struct CondensedGraph {
    pub components: Vec<Vec<String>>,
    pub component_of: HashMap<String, usize>,
    pub edges: Vec<BTreeSet<usize>>,
}

impl CondensedGraph {
    /// Components with more than one member, i.e. actual recursion cycles.
    pub fn cycles(&self) -> impl Iterator<Item = &Vec<String>> {
        self.components.iter().filter(|c| c.len() > 1)
    }
}

#[derive(Debug, Default)]
pub struct CallGraphBuilder {
    graph: BTreeMap<String, CallNode>,
}

impl CallGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk every supported source file under `repo_root` and accumulate
    /// definitions and call edges. Unreadable or unparsable files are
    /// skipped with a log line.
    pub fn build_from_repo(&mut self, repo_root: &Path) {
        let mut parsers: HashMap<Language, Parser> = HashMap::new();
        for entry in WalkDir::new(repo_root)
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
            self.process_file(repo_root, entry.path(), lang, &mut parsers);
        }
    }

    pub fn process_file(
        &mut self,
        repo_root: &Path,
        path: &Path,
        lang: Language,
        parsers: &mut HashMap<Language, Parser>,
    ) {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                debug!("cannot read {}: {}", path.display(), e);
                return;
            }
        };
        if !parsers.contains_key(&lang) {
            let mut parser = Parser::new();
            if let Err(e) = parser.set_language(&lang.grammar()) {
                warn!("grammar init failed for {}: {}", lang.name(), e);
                return;
            }
            parsers.insert(lang, parser);
        }
        let Some(parser) = parsers.get_mut(&lang) else {
            return;
        };
        let Some(tree) = parser.parse(&source, None) else {
            warn!("parse failed: {}", path.display());
            return;
        };

        let rel = path
            .strip_prefix(repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let (functions, calls) = extract_functions_and_calls(tree.root_node(), &source, lang);

        for (name, start_line, end_line) in functions {
            self.graph.entry(name).or_default().location = Some(Location {
                file: rel.clone(),
                start_line,
                end_line,
            });
        }
        for (caller, callee) in calls {
            self.graph
                .entry(caller.clone())
                .or_default()
                .calls
                .insert(callee.clone());
            self.graph.entry(callee).or_default().called_by.insert(caller);
        }
    }

    pub fn graph(&self) -> &BTreeMap<String, CallNode> {
        &self.graph
    }

    /// Tarjan's algorithm over the accumulated graph, iterative with an
    /// explicit two-stage stack, then the component-level edge lift.
    pub fn condense(&self) -> CondensedGraph {
        let mut index_counter = 0usize;
        let mut stack: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut lowlink: HashMap<String, usize> = HashMap::new();
        let mut on_stack: HashMap<String, bool> = HashMap::new();
        let mut components: Vec<Vec<String>> = Vec::new();

        for start in self.graph.keys() {
            if index.contains_key(start) {
                continue;
            }
            let mut dfs_stack: Vec<(String, u8)> = vec![(start.clone(), 0)];
            while let Some((current, stage)) = dfs_stack.pop() {
                if stage == 0 {
                    if index.contains_key(&current) {
                        continue;
                    }
                    index.insert(current.clone(), index_counter);
                    lowlink.insert(current.clone(), index_counter);
                    index_counter += 1;
                    stack.push(current.clone());
                    on_stack.insert(current.clone(), true);
                    dfs_stack.push((current.clone(), 1));
                    for neighbor in &self.graph[&current].calls {
                        if !self.graph.contains_key(neighbor) {
                            continue;
                        }
                        if !index.contains_key(neighbor) {
                            dfs_stack.push((neighbor.clone(), 0));
                        } else if on_stack.get(neighbor).copied().unwrap_or(false) {
                            let low = lowlink[&current].min(index[neighbor]);
                            lowlink.insert(current.clone(), low);
                        }
                    }
                } else {
                    for neighbor in &self.graph[&current].calls {
                        if !self.graph.contains_key(neighbor) {
                            continue;
                        }
                        if on_stack.get(neighbor).copied().unwrap_or(false) {
                            let low = lowlink[&current].min(lowlink[neighbor]);
                            lowlink.insert(current.clone(), low);
                        }
                    }
                    if lowlink[&current] == index[&current] {
                        let mut component = Vec::new();
                        while let Some(member) = stack.pop() {
                            on_stack.insert(member.clone(), false);
                            let done = member == current;
                            component.push(member);
                            if done {
                                break;
                            }
                        }
                        components.push(component);
                    }
                }
            }
        }

        let mut component_of = HashMap::new();
        for (cid, component) in components.iter().enumerate() {
            for member in component {
                component_of.insert(member.clone(), cid);
            }
        }
        let mut edges = vec![BTreeSet::new(); components.len()];
        for (cid, component) in components.iter().enumerate() {
            for member in component {
                for callee in &self.graph[member].calls {
                    if let Some(&target) = component_of.get(callee) {
                        if target != cid {
                            edges[cid].insert(target);
                        }
                    }
                }
            }
        }

        CondensedGraph {
            components,
            component_of,
            edges,
        }
    }
}

/// Per-file extraction: named callable definitions and (owner, callee)
/// call pairs. Callees rooted in a platform namespace are dropped; calls
/// outside any named definition have no owner and are dropped too.
fn extract_functions_and_calls(
    root: Node,
    code: &str,
    lang: Language,
) -> (Vec<(String, u32, u32)>, Vec<(String, String)>) {
    let mut functions = Vec::new();
    let mut calls = Vec::new();
    let callable_types = lang.callable_definition_types();
    let call_types = lang.call_types();
    let ignored = lang.ignored_namespaces();

    // (node, owner at entry)
    let mut stack: Vec<(Node, Option<String>)> = vec![(root, None)];
    while let Some((node, owner)) = stack.pop() {
        let mut owner = owner;
        if callable_types.contains(node.kind()) {
            if let Some(name) = definition_name(node, code) {
                functions.push((
                    name.clone(),
                    node.start_position().row as u32 + 1,
                    node.end_position().row as u32 + 1,
                ));
                owner = Some(name);
            }
        }

        if call_types.contains(node.kind()) {
            let callee = match lang {
                Language::Java | Language::Kotlin => extract_call_name(node, code),
                _ => node
                    .child_by_field_name("function")
                    .and_then(|f| extract_call_name(f, code)),
            };
            if let (Some(owner_name), Some(callee)) = (&owner, callee) {
                let root_ns = callee.split('.').next().unwrap_or("");
                if !ignored.contains(root_ns) {
                    calls.push((owner_name.clone(), callee));
                }
            }
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push((child, owner.clone()));
        }
    }
    (functions, calls)
}

fn definition_name(node: Node, code: &str) -> Option<String> {
    node.child_by_field_name("name")
        .and_then(|n| n.utf8_text(code.as_bytes()).ok())
        .map(str::to_string)
}

/// Dotted callee name from a call target node. Selector chains become
/// `left.right`; bare identifiers pass through.
fn extract_call_name(node: Node, code: &str) -> Option<String> {
    let text = |n: Node| n.utf8_text(code.as_bytes()).ok().map(str::to_string);
    match node.kind() {
        "selector_expression" | "member_expression" | "attribute" => {
            let left = node
                .child_by_field_name("object")
                .or_else(|| node.child_by_field_name("operand"))
                .and_then(|n| extract_call_name(n, code));
            let right = node
                .child_by_field_name("name")
                .or_else(|| node.child_by_field_name("field"))
                .or_else(|| node.child_by_field_name("attribute"))
                .and_then(|n| extract_call_name(n, code));
            match (left, right) {
                (Some(l), Some(r)) => Some(format!("{}.{}", l, r)),
                _ => None,
            }
        }
        "method_invocation" => node.child_by_field_name("name").and_then(text),
        "call_expression" => {
            let mut cursor = node.walk();
            let found = node
                .children(&mut cursor)
                .find(|c| c.kind() == "identifier" || c.kind() == "simple_identifier");
            found.and_then(text)
        }
        _ => text(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn build(files: &[(&str, &str)]) -> CallGraphBuilder {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        let mut builder = CallGraphBuilder::new();
        builder.build_from_repo(dir.path());
        builder
    }

    #[test]
    fn test_simple_call_edge() {
        let builder = build(&[(
            "a.py",
            "def foo():\n    return 1\n\ndef bar():\n    return foo()\n",
        )]);
        let graph = builder.graph();
        assert!(graph["bar"].calls.contains("foo"));
        assert!(graph["foo"].called_by.contains("bar"));
        assert_eq!(
            graph["foo"].location,
            Some(Location {
                file: "a.py".to_string(),
                start_line: 1,
                end_line: 2,
            })
        );
    }

    #[test]
    fn test_platform_namespace_calls_ignored() {
        let builder = build(&[(
            "a.py",
            "import os\n\ndef foo():\n    return os.getcwd()\n",
        )]);
        let graph = builder.graph();
        assert!(graph["foo"].calls.is_empty());
    }

    #[test]
    fn test_mutual_recursion_forms_one_component() {
        let builder = build(&[(
            "a.py",
            "def ping(n):\n    return pong(n)\n\ndef pong(n):\n    return ping(n)\n\ndef leaf():\n    return ping(1)\n",
        )]);
        let condensed = builder.condense();
        let cycle: Vec<&Vec<String>> = condensed.cycles().collect();
        assert_eq!(cycle.len(), 1);
        let mut members = cycle[0].clone();
        members.sort();
        assert_eq!(members, vec!["ping".to_string(), "pong".to_string()]);
        assert_eq!(
            condensed.component_of["ping"],
            condensed.component_of["pong"]
        );
        assert_ne!(
            condensed.component_of["leaf"],
            condensed.component_of["ping"]
        );
    }

    #[test]
    fn test_condensed_edges_are_acyclic_between_components() {
        let builder = build(&[(
            "a.py",
            "def a():\n    return b()\n\ndef b():\n    return c()\n\ndef c():\n    return a() + d()\n\ndef d():\n    return 1\n",
        )]);
        let condensed = builder.condense();
        let cycle_id = condensed.component_of["a"];
        assert_eq!(condensed.component_of["b"], cycle_id);
        assert_eq!(condensed.component_of["c"], cycle_id);
        let d_id = condensed.component_of["d"];
        assert!(condensed.edges[cycle_id].contains(&d_id));
        assert!(condensed.edges[d_id].is_empty());
    }
}
