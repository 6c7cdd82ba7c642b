//! External collaborator contracts: documentation generation and change
//! detection. Both are traits so the orchestration layer can be exercised
//! with in-process fakes.

use docgraph_model::StructureRecord;
use std::collections::BTreeSet;
use std::path::Path;

/// A reference neighbor handed to the generator: who it is, what it is,
/// and its newest documentation if any.
#[derive(Debug, Clone)]
pub struct NeighborDoc {
    pub full_name: String,
    pub kind: String,
    pub latest_doc: Option<String>,
}

/// Everything the generator may use for one entity. A plain-data snapshot
/// taken under the run lock, so generation itself runs unlocked.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub full_name: String,
    pub kind: String,
    pub code_text: String,
    pub params: Vec<String>,
    pub has_return: bool,
    pub references_out: Vec<NeighborDoc>,
    pub references_in: Vec<NeighborDoc>,
    pub previous_doc: Option<String>,
}

/// Produces one documentation string per entity, or fails; a failure is
/// confined to that entity's task.
pub trait DocGenerator: Send + Sync {
    fn generate(&self, context: &GenerationContext) -> anyhow::Result<String>;
}

/// Line-level diff of one file against the previous revision. `added` is
/// in new-file coordinates, `removed` in old-file coordinates, both
/// 1-based and ordered.
#[derive(Debug, Clone, Default)]
pub struct FileDiff {
    pub added: Vec<(u32, String)>,
    pub removed: Vec<(u32, String)>,
}

/// Supplies per-file diffs; typically backed by the version control
/// system.
pub trait ChangeDetector {
    fn file_diff(&self, file_path: &Path, is_new_file: bool) -> anyhow::Result<FileDiff>;
}

/// Names (with their parents) of the structures whose line ranges cover
/// any added line of the diff. Removed lines are in old-file coordinates
/// and cannot be mapped onto the new structures, so they are ignored here.
pub fn structures_touched(
    diff: &FileDiff,
    records: &[StructureRecord],
) -> BTreeSet<(String, Option<String>)> {
    let mut touched = BTreeSet::new();
    for (line, _) in &diff.added {
        for record in records {
            if record.start_line <= *line && *line <= record.end_line {
                touched.insert((record.name.clone(), record.parent.clone()));
            }
        }
    }
    touched
}
