//! Dependency graph construction and incremental reconciliation.
//!
//! `parse_reference` turns resolver hits into bidirectional edges between
//! entities; `reconcile` carries documentation and statuses from a
//! previous run's tree onto a freshly built one and derives the change
//! statuses out of the reference-set deltas.

use crate::meta::MetaInfo;
use docgraph_model::{
    AnalysisConfig, EntityId, EntityStatus, EntityTree, RefQuery, ReferenceResolver,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Resolve references for every documentable entity and populate the
/// bidirectional edge lists. Existing edges are discarded first, so the
/// pass is safe to re-run.
pub fn parse_reference(meta: &mut MetaInfo, config: &AnalysisConfig) {
    meta.tree.clear_references();
    let mut resolver =
        ReferenceResolver::new(&meta.repo_root, config.import_similarity_threshold);

    let allow_files: Vec<String> = config
        .allow_list
        .iter()
        .flatten()
        .map(|e| e.file_path.clone())
        .collect();
    let allow_names: Vec<String> = config
        .allow_list
        .iter()
        .flatten()
        .map(|e| e.name.clone())
        .collect();

    let mut edge_count = 0usize;
    for file in meta.tree.files() {
        let file_path = meta.tree.full_name(file);
        if meta.skip_files.contains(&file_path) {
            continue;
        }
        if !allow_files.is_empty() && !allow_files.contains(&file_path) {
            continue;
        }
        for target in meta.tree.preorder(file) {
            if meta.tree.get(target).kind.is_container() {
                continue;
            }
            // out-of-list entities still resolve, but only inside their
            // own file
            let in_file_only =
                !allow_names.is_empty() && !allow_names.contains(&meta.tree.get(target).name);
            let query = RefQuery {
                file: file_path.clone(),
                name: meta.tree.get(target).name.clone(),
                line: meta.tree.get(target).start_line,
                column: meta.tree.get(target).name_column,
                in_file_only,
            };
            for hit in resolver.resolve(&query) {
                if meta.shadow_file_map.values().any(|shadow| *shadow == hit.file) {
                    debug!("reference from unstaged snapshot, skipped: {}", hit.file);
                    continue;
                }
                if meta.skip_files.contains(&hit.file) {
                    debug!("reference from untracked file, skipped: {}", hit.file);
                    continue;
                }
                let segments: Vec<&str> = hit.file.split('/').collect();
                let Some(hit_file) = meta.tree.find_path(&segments) else {
                    warn!(
                        "referencing file {} not in tree, edge dropped",
                        hit.file
                    );
                    continue;
                };
                let referencer = meta.tree.entity_at_line(hit_file, hit.line);
                if meta.tree.get(referencer).name == meta.tree.get(target).name {
                    debug!(
                        "same-name reference skipped: {}",
                        meta.tree.full_name(target)
                    );
                    continue;
                }
                if meta.tree.has_ancestor_relation(referencer, target) {
                    continue;
                }
                let weak = meta.tree.get(referencer).kind.is_function_like()
                    && meta.tree.get(referencer).start_line == hit.line;
                if meta.tree.add_reference(referencer, target, weak) {
                    edge_count += 1;
                }
            }
        }
    }
    info!("reference pass complete: {} edges", edge_count);

    // the persisted referencer name list mirrors the live edges
    for id in meta.tree.preorder(meta.tree.root()) {
        let in_names: Vec<String> = meta
            .tree
            .get(id)
            .refs_in
            .iter()
            .map(|r| meta.tree.full_name(*r))
            .collect();
        meta.tree.get_mut(id).refs_in_names = in_names;
    }
}

/// Carry state from the previous run's tree onto the freshly built tree in
/// `meta`, then re-resolve references and derive change statuses.
pub fn reconcile(meta: &mut MetaInfo, old_tree: &EntityTree, config: &AnalysisConfig) {
    // 1. structural carry-over, old entity -> counterpart by parallel path.
    // A missing entity is recorded once at the top of its missing subtree;
    // its descendants are necessarily gone too and stay unrecorded.
    let mut matched_new: Vec<(EntityId, EntityId)> = Vec::new();
    let mut missing: HashSet<EntityId> = HashSet::new();
    for old_id in old_tree.preorder(old_tree.root()) {
        if old_id == old_tree.root() {
            continue;
        }
        let full_name = old_tree.full_name(old_id);
        let segments: Vec<&str> = full_name.split('/').collect();
        let Some(new_id) = meta.tree.find_path(&segments) else {
            let inside_deleted_subtree = old_tree
                .get(old_id)
                .parent
                .is_some_and(|p| missing.contains(&p));
            missing.insert(old_id);
            if !inside_deleted_subtree {
                meta.record_deleted(
                    full_name,
                    old_tree.get(old_id).kind.wire_kind().to_string(),
                );
            }
            continue;
        };
        let old_entity = old_tree.get(old_id);
        if old_entity.kind.is_container() {
            continue;
        }
        let changed = meta.tree.get(new_id).code_text != old_entity.code_text;
        let new_entity = meta.tree.get_mut(new_id);
        new_entity.doc_versions = old_entity.doc_versions.clone();
        new_entity.status = if changed {
            EntityStatus::CodeChanged
        } else {
            old_entity.status
        };
        matched_new.push((new_id, old_id));
    }

    // 2. fresh reference pass over the new tree
    parse_reference(meta, config);

    // 3. referencer-set deltas flip previously up-to-date entities
    for (new_id, old_id) in matched_new {
        if meta.tree.get(new_id).status != EntityStatus::UpToDate {
            continue;
        }
        let old_in: HashSet<&String> = old_tree.get(old_id).refs_in_names.iter().collect();
        let new_in: HashSet<&String> = meta.tree.get(new_id).refs_in_names.iter().collect();
        if old_in == new_in {
            continue;
        }
        let status = if new_in.is_subset(&old_in) {
            EntityStatus::ReferencerRemoved
        } else {
            EntityStatus::ReferencerAdded
        };
        info!(
            "{}: referencer set changed, status {}",
            meta.tree.full_name(new_id),
            status.as_str()
        );
        meta.tree.get_mut(new_id).status = status;
    }

    meta.tree.mark_pending_work(&config.ignore_list);
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_model::{build_tree, RecordKind, StructureRecord};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn record(name: &str, start: u32, end: u32, code: &str) -> StructureRecord {
        StructureRecord {
            kind: RecordKind::FunctionDef,
            name: name.to_string(),
            start_line: start,
            end_line: end,
            params: vec![],
            parent: None,
            code_text: code.to_string(),
            name_column: 4,
            has_return: true,
        }
    }

    fn foo_bar_repo() -> (TempDir, BTreeMap<String, Vec<StructureRecord>>) {
        let dir = TempDir::new().unwrap();
        let source = "def foo():\n    return 1\n\ndef bar():\n    return foo()\n";
        fs::write(dir.path().join("a.py"), source).unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            vec![
                record("foo", 1, 2, "def foo():\n    return 1"),
                record("bar", 4, 5, "def bar():\n    return foo()"),
            ],
        );
        (dir, files)
    }

    #[test]
    fn test_parse_reference_builds_bidirectional_edges() {
        let (dir, files) = foo_bar_repo();
        let config = AnalysisConfig::new(dir.path());
        let tree = build_tree(&files, &config).unwrap();
        let mut meta = MetaInfo::new(dir.path(), tree);

        parse_reference(&mut meta, &config);

        let foo = meta.tree.find_path(&["a.py", "foo"]).unwrap();
        let bar = meta.tree.find_path(&["a.py", "bar"]).unwrap();
        assert_eq!(meta.tree.get(bar).refs_out.len(), 1);
        assert_eq!(meta.tree.get(bar).refs_out[0].target, foo);
        assert!(!meta.tree.get(bar).refs_out[0].weak);
        assert_eq!(meta.tree.get(foo).refs_in, vec![bar]);
        assert_eq!(meta.tree.get(foo).refs_in_names, vec!["a.py/bar".to_string()]);
    }

    #[test]
    fn test_reconcile_detects_code_change() {
        let (dir, files) = foo_bar_repo();
        let config = AnalysisConfig::new(dir.path());
        let mut old_tree = build_tree(&files, &config).unwrap();
        for id in old_tree.preorder(old_tree.root()) {
            if !old_tree.get(id).kind.is_container() {
                old_tree.get_mut(id).status = EntityStatus::UpToDate;
                old_tree.get_mut(id).doc_versions = vec!["doc".to_string()];
            }
        }

        let mut new_files = files.clone();
        new_files.get_mut("a.py").unwrap()[0].code_text =
            "def foo():\n    return 2".to_string();
        let new_tree = build_tree(&new_files, &config).unwrap();
        let mut meta = MetaInfo::new(dir.path(), new_tree);
        reconcile(&mut meta, &old_tree, &config);

        let foo = meta.tree.find_path(&["a.py", "foo"]).unwrap();
        let bar = meta.tree.find_path(&["a.py", "bar"]).unwrap();
        assert_eq!(meta.tree.get(foo).status, EntityStatus::CodeChanged);
        assert_eq!(meta.tree.get(foo).doc_versions, vec!["doc".to_string()]);
        assert_eq!(meta.tree.get(bar).status, EntityStatus::UpToDate);
        assert!(meta.tree.get(meta.tree.root()).has_pending_work);
    }

    #[test]
    fn test_skip_files_contribute_no_edges() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    return 1\n").unwrap();
        fs::write(
            dir.path().join("b.py"),
            "from a import foo\n\ndef bar():\n    return foo()\n",
        )
        .unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            vec![record("foo", 1, 2, "def foo():\n    return 1")],
        );
        files.insert(
            "b.py".to_string(),
            vec![record("bar", 3, 4, "def bar():\n    return foo()")],
        );
        let config = AnalysisConfig::new(dir.path());
        let tree = build_tree(&files, &config).unwrap();
        let mut meta = MetaInfo::new(dir.path(), tree);
        meta.skip_files = vec!["b.py".to_string()];

        parse_reference(&mut meta, &config);

        let foo = meta.tree.find_path(&["a.py", "foo"]).unwrap();
        assert!(meta.tree.get(foo).refs_in.is_empty());
    }

    #[test]
    fn test_reconcile_records_deletion_once() {
        let (dir, files) = foo_bar_repo();
        let config = AnalysisConfig::new(dir.path());
        let old_tree = build_tree(&files, &config).unwrap();

        // bar disappears in the new snapshot
        fs::write(dir.path().join("a.py"), "def foo():\n    return 1\n").unwrap();
        let mut new_files = files.clone();
        new_files.get_mut("a.py").unwrap().truncate(1);
        let new_tree = build_tree(&new_files, &config).unwrap();
        let mut meta = MetaInfo::new(dir.path(), new_tree);
        reconcile(&mut meta, &old_tree, &config);

        assert_eq!(
            meta.deleted_since_last_run,
            vec![("a.py/bar".to_string(), "FunctionDef".to_string())]
        );
    }

    #[test]
    fn test_reconcile_records_deleted_file_not_its_members() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    return 1\n").unwrap();
        fs::write(
            dir.path().join("gone.py"),
            "def f1():\n    return 1\n\ndef f2():\n    return 2\n",
        )
        .unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            vec![record("foo", 1, 2, "def foo():\n    return 1")],
        );
        files.insert(
            "gone.py".to_string(),
            vec![
                record("f1", 1, 2, "def f1():\n    return 1"),
                record("f2", 4, 5, "def f2():\n    return 2"),
            ],
        );
        let config = AnalysisConfig::new(dir.path());
        let old_tree = build_tree(&files, &config).unwrap();

        fs::remove_file(dir.path().join("gone.py")).unwrap();
        files.remove("gone.py");
        let new_tree = build_tree(&files, &config).unwrap();
        let mut meta = MetaInfo::new(dir.path(), new_tree);
        reconcile(&mut meta, &old_tree, &config);

        assert_eq!(
            meta.deleted_since_last_run,
            vec![("gone.py".to_string(), "File".to_string())]
        );
    }

    #[test]
    fn test_reconcile_flags_new_referencer() {
        let (dir, files) = foo_bar_repo();
        let config = AnalysisConfig::new(dir.path());
        let mut old_meta = MetaInfo::new(dir.path(), build_tree(&files, &config).unwrap());
        parse_reference(&mut old_meta, &config);
        for id in old_meta.tree.preorder(old_meta.tree.root()) {
            if !old_meta.tree.get(id).kind.is_container() {
                old_meta.tree.get_mut(id).status = EntityStatus::UpToDate;
            }
        }

        // baz also calls foo now
        let source =
            "def foo():\n    return 1\n\ndef bar():\n    return foo()\n\ndef baz():\n    return foo()\n";
        fs::write(dir.path().join("a.py"), source).unwrap();
        let mut new_files = files.clone();
        new_files
            .get_mut("a.py")
            .unwrap()
            .push(record("baz", 7, 8, "def baz():\n    return foo()"));
        let new_tree = build_tree(&new_files, &config).unwrap();
        let mut meta = MetaInfo::new(dir.path(), new_tree);
        reconcile(&mut meta, &old_meta.tree, &config);

        let foo = meta.tree.find_path(&["a.py", "foo"]).unwrap();
        assert_eq!(meta.tree.get(foo).status, EntityStatus::ReferencerAdded);
    }
}
