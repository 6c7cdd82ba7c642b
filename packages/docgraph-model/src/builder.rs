//! Tree construction from per-file structural records.
//!
//! Records arrive flat; nesting is recovered by line-range containment.
//! Each record attaches under the smallest strictly-containing sibling
//! record, falling back to the file node.

use crate::config::AnalysisConfig;
use crate::entity::{Entity, EntityId, EntityKind, EntityTree};
use crate::error::Result;
use crate::record::StructureRecord;
use std::collections::BTreeMap;
use tracing::debug;

/// Build the full entity tree from a map of repository-relative file path
/// to that file's structural records.
///
/// Directory and file nodes are created on demand from the path segments;
/// the record list order is preserved among siblings. The returned tree is
/// finalized (depths and ancestor paths computed).
pub fn build_tree(
    files: &BTreeMap<String, Vec<StructureRecord>>,
    config: &AnalysisConfig,
) -> Result<EntityTree> {
    let repo_name = config
        .repo_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    let mut tree = EntityTree::new(repo_name);

    for (path, records) in files {
        let file = insert_file(&mut tree, path);
        attach_records(&mut tree, file, records, config);
        debug!("built {} entities for {}", records.len(), path);
    }

    tree.finalize();
    tree.mark_pending_work(&config.ignore_list);
    Ok(tree)
}

/// Create (or reuse) the Dir chain for `path` and the File node at its end.
fn insert_file(tree: &mut EntityTree, path: &str) -> EntityId {
    let mut now = tree.root();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i + 1 == segments.len();
        match tree.child_by_key(now, segment) {
            Some(existing) => now = existing,
            None => {
                let kind = if is_last { EntityKind::File } else { EntityKind::Dir };
                let child = tree.alloc(Entity::new(kind, *segment));
                tree.add_child(now, child);
                now = child;
            }
        }
    }
    now
}

/// Attach a file's records by strict containment. For each record the
/// parent is the smallest-span record that strictly contains it, or the
/// file node when none does.
fn attach_records(
    tree: &mut EntityTree,
    file: EntityId,
    records: &[StructureRecord],
    config: &AnalysisConfig,
) {
    // parent index per record, resolved against the flat list first so that
    // allocation order cannot influence attachment
    let mut parents: Vec<Option<usize>> = vec![None; records.len()];
    for (i, record) in records.iter().enumerate() {
        let mut best: Option<usize> = None;
        for (j, candidate) in records.iter().enumerate() {
            if i == j || !candidate.contains(record) {
                continue;
            }
            match best {
                Some(b) if records[b].span() <= candidate.span() => {}
                _ => best = Some(j),
            }
        }
        parents[i] = best;
    }

    let mut ids: Vec<Option<EntityId>> = vec![None; records.len()];
    // records come pre-sorted by position; a contained record can still
    // precede its container, so loop until every record is placed
    let mut remaining = records.len();
    while remaining > 0 {
        let before = remaining;
        for i in 0..records.len() {
            if ids[i].is_some() {
                continue;
            }
            let parent_id = match parents[i] {
                None => Some(file),
                Some(j) => ids[j],
            };
            let Some(parent_id) = parent_id else { continue };
            let record = &records[i];
            let kind = EntityKind::classify(record.kind, tree.get(parent_id).kind);
            if !in_allow_list(tree, file, record, config) {
                ids[i] = Some(parent_id); // placeholder, nothing allocated
                remaining -= 1;
                continue;
            }
            let mut entity = Entity::new(kind, record.name.clone());
            entity.start_line = record.start_line;
            entity.end_line = record.end_line;
            entity.params = record.params.clone();
            entity.code_text = record.code_text.clone();
            entity.name_column = record.name_column;
            entity.has_return = record.has_return;
            let id = tree.alloc(entity);
            tree.add_child(parent_id, id);
            ids[i] = Some(id);
            remaining -= 1;
        }
        if remaining == before {
            // containment cycle in malformed input; attach the rest flat
            for i in 0..records.len() {
                if ids[i].is_none() {
                    parents[i] = None;
                }
            }
        }
    }
}

fn in_allow_list(
    tree: &EntityTree,
    file: EntityId,
    record: &StructureRecord,
    config: &AnalysisConfig,
) -> bool {
    let Some(allow) = &config.allow_list else {
        return true;
    };
    let file_path = tree.full_name(file);
    allow
        .iter()
        .any(|entry| entry.file_path == file_path && entry.name == record.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllowListEntry;
    use crate::entity::EntityKind;
    use crate::record::RecordKind;

    fn record(kind: RecordKind, name: &str, start: u32, end: u32) -> StructureRecord {
        StructureRecord {
            kind,
            name: name.to_string(),
            start_line: start,
            end_line: end,
            params: vec![],
            parent: None,
            code_text: format!("{} body", name),
            name_column: 4,
            has_return: false,
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig::new("/tmp/repo")
    }

    #[test]
    fn test_nesting_by_containment() {
        let mut files = BTreeMap::new();
        files.insert(
            "src/app.py".to_string(),
            vec![
                record(RecordKind::ClassDef, "Service", 1, 30),
                record(RecordKind::FunctionDef, "handle", 3, 10),
                record(RecordKind::FunctionDef, "helper", 5, 8),
                record(RecordKind::FunctionDef, "free", 32, 40),
            ],
        );
        let tree = build_tree(&files, &config()).unwrap();

        let class = tree.find_path(&["src", "app.py", "Service"]).unwrap();
        let method = tree.find_path(&["src", "app.py", "Service", "handle"]).unwrap();
        let nested = tree
            .find_path(&["src", "app.py", "Service", "handle", "helper"])
            .unwrap();
        let free = tree.find_path(&["src", "app.py", "free"]).unwrap();

        assert_eq!(tree.get(class).kind, EntityKind::Class);
        assert_eq!(tree.get(method).kind, EntityKind::Method);
        assert_eq!(tree.get(nested).kind, EntityKind::NestedFunction);
        assert_eq!(tree.get(free).kind, EntityKind::Function);
    }

    #[test]
    fn test_dir_chain_shared_between_files() {
        let mut files = BTreeMap::new();
        files.insert("src/a.py".to_string(), vec![]);
        files.insert("src/b.py".to_string(), vec![]);
        let tree = build_tree(&files, &config()).unwrap();

        let dir = tree.find_path(&["src"]).unwrap();
        assert_eq!(tree.get(dir).kind, EntityKind::Dir);
        assert_eq!(tree.get(dir).children.len(), 2);
    }

    #[test]
    fn test_smallest_container_wins() {
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            vec![
                record(RecordKind::ClassDef, "Outer", 1, 100),
                record(RecordKind::ClassDef, "Inner", 10, 50),
                record(RecordKind::FunctionDef, "deep", 20, 30),
            ],
        );
        let tree = build_tree(&files, &config()).unwrap();
        assert!(tree.find_path(&["a.py", "Outer", "Inner", "deep"]).is_some());
    }

    #[test]
    fn test_allow_list_filters_records() {
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            vec![
                record(RecordKind::FunctionDef, "kept", 1, 5),
                record(RecordKind::FunctionDef, "dropped", 7, 12),
            ],
        );
        let cfg = AnalysisConfig::new("/tmp/repo");
        let cfg = AnalysisConfig {
            allow_list: Some(vec![AllowListEntry {
                file_path: "a.py".to_string(),
                name: "kept".to_string(),
            }]),
            ..cfg
        };
        let tree = build_tree(&files, &cfg).unwrap();
        assert!(tree.find_path(&["a.py", "kept"]).is_some());
        assert!(tree.find_path(&["a.py", "dropped"]).is_none());
    }

    #[test]
    fn test_global_var_kind() {
        let mut files = BTreeMap::new();
        files.insert(
            "a.py".to_string(),
            vec![record(RecordKind::GlobalVar, "CONFIG", 1, 1)],
        );
        let tree = build_tree(&files, &config()).unwrap();
        let var = tree.find_path(&["a.py", "CONFIG"]).unwrap();
        assert_eq!(tree.get(var).kind, EntityKind::GlobalVar);
    }
}
