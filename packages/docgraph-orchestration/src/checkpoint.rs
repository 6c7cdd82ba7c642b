//! On-disk checkpoint: two JSON documents per run.
//!
//! `hierarchy.json` maps each file's full name to its entity records;
//! `meta.json` carries the run-level fields. Writes go through a temp file
//! and an atomic rename so a crash mid-write never corrupts the previous
//! checkpoint.

use crate::error::{OrchestratorError, Result};
use crate::meta::MetaInfo;
use docgraph_model::{
    build_tree, AnalysisConfig, EntityId, EntityStatus, RecordKind, StructureRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const HIERARCHY_DOC: &str = "hierarchy.json";
const META_DOC: &str = "meta.json";

/// One reference endpoint as persisted. In flash mode `name` is the
/// fully-qualified full name; otherwise the plain entity name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub name: String,
    #[serde(default)]
    pub weak: bool,
}

/// One persisted entity. Structural fields mirror `StructureRecord`; the
/// rest restore generation state on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub code_text: String,
    #[serde(default)]
    pub name_column: u32,
    #[serde(default)]
    pub has_return: bool,
    pub status: String,
    #[serde(default)]
    pub doc_versions: Vec<String>,
    #[serde(default)]
    pub references_out: Vec<ReferenceRecord>,
    #[serde(default)]
    pub references_in: Vec<ReferenceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaDoc {
    last_processed_revision: String,
    in_progress: bool,
    shadow_file_map: HashMap<String, String>,
    skip_files: Vec<String>,
    deleted_since_last_run: Vec<(String, String)>,
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn exists(&self) -> bool {
        self.dir.join(HIERARCHY_DOC).is_file() && self.dir.join(META_DOC).is_file()
    }

    /// Persist the full run state. `flash` switches the reference lists to
    /// fully-qualified names with weak flags, which is what the next run's
    /// reconciliation compares against.
    pub fn save(&self, meta: &MetaInfo, flash: bool) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut hierarchy: BTreeMap<String, Vec<EntityRecord>> = BTreeMap::new();
        for file in meta.tree.files() {
            let file_name = meta.tree.full_name(file);
            let mut records = Vec::new();
            for id in meta.tree.preorder(file) {
                if id == file {
                    continue;
                }
                records.push(entity_record(meta, id, flash));
            }
            hierarchy.insert(file_name, records);
        }

        let meta_doc = MetaDoc {
            last_processed_revision: meta.last_processed_revision.clone(),
            in_progress: meta.in_progress,
            shadow_file_map: meta.shadow_file_map.clone(),
            skip_files: meta.skip_files.clone(),
            deleted_since_last_run: meta.deleted_since_last_run.clone(),
        };

        write_atomic(
            &self.dir.join(HIERARCHY_DOC),
            &serde_json::to_vec_pretty(&hierarchy)?,
        )?;
        write_atomic(&self.dir.join(META_DOC), &serde_json::to_vec_pretty(&meta_doc)?)?;
        info!("checkpoint written to {}", self.dir.display());
        Ok(())
    }

    /// Rebuild run state from disk. The tree is reconstructed through the
    /// regular builder, then statuses, docs and persisted reference names
    /// are applied record by record.
    pub fn load(&self, config: &AnalysisConfig) -> Result<MetaInfo> {
        let hierarchy: BTreeMap<String, Vec<EntityRecord>> =
            serde_json::from_slice(&fs::read(self.dir.join(HIERARCHY_DOC))?)?;
        let meta_doc: MetaDoc = serde_json::from_slice(&fs::read(self.dir.join(META_DOC))?)?;

        let mut files: BTreeMap<String, Vec<StructureRecord>> = BTreeMap::new();
        for (file, records) in &hierarchy {
            let mut structural = Vec::new();
            for record in records {
                let Some(kind) = RecordKind::parse(&record.kind) else {
                    warn!("unknown record kind {} in {}, skipped", record.kind, file);
                    continue;
                };
                structural.push(StructureRecord {
                    kind,
                    name: record.name.clone(),
                    start_line: record.start_line,
                    end_line: record.end_line,
                    params: record.params.clone(),
                    parent: record.parent.clone(),
                    code_text: record.code_text.clone(),
                    name_column: record.name_column,
                    has_return: record.has_return,
                });
            }
            files.insert(file.clone(), structural);
        }
        let tree = build_tree(&files, config)?;
        let mut meta = MetaInfo::new(&config.repo_root, tree);
        meta.last_processed_revision = meta_doc.last_processed_revision;
        meta.in_progress = meta_doc.in_progress;
        meta.shadow_file_map = meta_doc.shadow_file_map;
        meta.skip_files = meta_doc.skip_files;
        meta.deleted_since_last_run = meta_doc.deleted_since_last_run;

        for (file, records) in &hierarchy {
            let segments: Vec<&str> = file.split('/').collect();
            let Some(file_id) = meta.tree.find_path(&segments) else {
                return Err(OrchestratorError::persistence(format!(
                    "file {} missing after rebuild",
                    file
                )));
            };
            apply_records(&mut meta, file_id, records)?;
        }
        Ok(meta)
    }
}

fn entity_record(meta: &MetaInfo, id: EntityId, flash: bool) -> EntityRecord {
    let tree = &meta.tree;
    let entity = tree.get(id);
    let persisted_name = |target: EntityId| {
        if flash {
            tree.full_name(target)
        } else {
            tree.get(target).name.clone()
        }
    };
    let references_out: Vec<ReferenceRecord> = entity
        .refs_out
        .iter()
        .map(|edge| ReferenceRecord {
            name: persisted_name(edge.target),
            weak: edge.weak,
        })
        .collect();
    let references_in: Vec<ReferenceRecord> = entity
        .refs_in
        .iter()
        .map(|referencer| ReferenceRecord {
            name: persisted_name(*referencer),
            weak: false,
        })
        .collect();
    EntityRecord {
        kind: entity.kind.wire_kind().to_string(),
        name: entity.name.clone(),
        start_line: entity.start_line,
        end_line: entity.end_line,
        params: entity.params.clone(),
        parent: entity
            .parent
            .filter(|p| !tree.get(*p).kind.is_container())
            .map(|p| tree.get(p).name.clone()),
        code_text: entity.code_text.clone(),
        name_column: entity.name_column,
        has_return: entity.has_return,
        status: entity.status.as_str().to_string(),
        doc_versions: entity.doc_versions.clone(),
        references_out,
        references_in,
    }
}

/// Match each record to the rebuilt entity with the same name and range,
/// then restore its generation state.
fn apply_records(meta: &mut MetaInfo, file_id: EntityId, records: &[EntityRecord]) -> Result<()> {
    let in_file = meta.tree.preorder(file_id);
    let mut used: HashSet<EntityId> = HashSet::new();
    for record in records {
        let found = in_file.iter().copied().find(|id| {
            !used.contains(id)
                && meta.tree.get(*id).name == record.name
                && meta.tree.get(*id).start_line == record.start_line
                && meta.tree.get(*id).end_line == record.end_line
        });
        let Some(id) = found else {
            return Err(OrchestratorError::persistence(format!(
                "no entity for record {} ({}-{})",
                record.name, record.start_line, record.end_line
            )));
        };
        used.insert(id);
        let Some(status) = EntityStatus::parse(&record.status) else {
            return Err(OrchestratorError::persistence(format!(
                "unknown status {} for {}",
                record.status, record.name
            )));
        };
        let entity = meta.tree.get_mut(id);
        entity.status = status;
        entity.doc_versions = record.doc_versions.clone();
        entity.refs_in_names = record.references_in.iter().map(|r| r.name.clone()).collect();
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_meta(repo: &Path) -> (MetaInfo, AnalysisConfig) {
        let config = AnalysisConfig::new(repo);
        let mut files = BTreeMap::new();
        files.insert(
            "src/a.py".to_string(),
            vec![
                StructureRecord {
                    kind: RecordKind::FunctionDef,
                    name: "foo".to_string(),
                    start_line: 1,
                    end_line: 2,
                    params: vec!["x".to_string()],
                    parent: None,
                    code_text: "def foo(x):\n    return x".to_string(),
                    name_column: 4,
                    has_return: true,
                },
                StructureRecord {
                    kind: RecordKind::FunctionDef,
                    name: "bar".to_string(),
                    start_line: 4,
                    end_line: 5,
                    params: vec![],
                    parent: None,
                    code_text: "def bar():\n    return foo(1)".to_string(),
                    name_column: 4,
                    has_return: true,
                },
            ],
        );
        let tree = build_tree(&files, &config).unwrap();
        (MetaInfo::new(repo, tree), config)
    }

    #[test]
    fn test_roundtrip_preserves_state() {
        let dir = TempDir::new().unwrap();
        let (mut meta, config) = sample_meta(dir.path());
        let foo = meta.tree.find_path(&["src", "a.py", "foo"]).unwrap();
        let bar = meta.tree.find_path(&["src", "a.py", "bar"]).unwrap();
        meta.tree.add_reference(bar, foo, false);
        meta.tree.get_mut(foo).status = EntityStatus::UpToDate;
        meta.tree.get_mut(foo).doc_versions = vec!["v1".to_string(), "v2".to_string()];
        meta.last_processed_revision = "abc123".to_string();
        meta.skip_files = vec!["scratch.py".to_string()];
        meta.record_deleted("src/a.py/old".to_string(), "FunctionDef".to_string());

        let store = CheckpointStore::new(dir.path().join(".docgraph"));
        store.save(&meta, true).unwrap();
        assert!(store.exists());

        let loaded = store.load(&config).unwrap();
        assert_eq!(loaded.last_processed_revision, "abc123");
        assert_eq!(loaded.skip_files, vec!["scratch.py".to_string()]);
        assert_eq!(
            loaded.deleted_since_last_run,
            vec![("src/a.py/old".to_string(), "FunctionDef".to_string())]
        );
        let foo = loaded.tree.find_path(&["src", "a.py", "foo"]).unwrap();
        let bar = loaded.tree.find_path(&["src", "a.py", "bar"]).unwrap();
        assert_eq!(loaded.tree.get(foo).status, EntityStatus::UpToDate);
        assert_eq!(
            loaded.tree.get(foo).doc_versions,
            vec!["v1".to_string(), "v2".to_string()]
        );
        assert_eq!(
            loaded.tree.get(foo).refs_in_names,
            vec!["src/a.py/bar".to_string()]
        );
        assert_eq!(loaded.tree.get(bar).status, EntityStatus::NotGenerated);

        // the outgoing side is persisted too, from the live edges
        let hierarchy: BTreeMap<String, Vec<EntityRecord>> = serde_json::from_slice(
            &fs::read(dir.path().join(".docgraph").join("hierarchy.json")).unwrap(),
        )
        .unwrap();
        let bar_record = hierarchy["src/a.py"]
            .iter()
            .find(|r| r.name == "bar")
            .unwrap();
        assert_eq!(bar_record.references_out.len(), 1);
        assert_eq!(bar_record.references_out[0].name, "src/a.py/foo");
        assert!(!bar_record.references_out[0].weak);
    }

    #[test]
    fn test_save_overwrites_previous_checkpoint() {
        let dir = TempDir::new().unwrap();
        let (mut meta, config) = sample_meta(dir.path());
        let store = CheckpointStore::new(dir.path().join(".docgraph"));
        store.save(&meta, false).unwrap();

        meta.last_processed_revision = "second".to_string();
        store.save(&meta, false).unwrap();
        let loaded = store.load(&config).unwrap();
        assert_eq!(loaded.last_processed_revision, "second");
    }

    #[test]
    fn test_missing_checkpoint_reports_not_exists() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join(".docgraph"));
        assert!(!store.exists());
    }
}
