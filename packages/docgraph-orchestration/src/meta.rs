//! Run state: the entity tree plus everything that must survive between
//! runs to make the next one incremental.

use docgraph_model::{EntityStatus, EntityTree};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Mutable state of one documentation run. Serialized to and from the
/// checkpoint store between runs.
pub struct MetaInfo {
    pub repo_root: PathBuf,
    pub last_processed_revision: String,
    pub tree: EntityTree,

    /// Path of an uncommitted/modified file mapped to the snapshot path
    /// used during analysis. Hits in snapshot files are not turned into
    /// reference edges.
    pub shadow_file_map: HashMap<String, String>,

    /// Untracked files excluded from analysis.
    pub skip_files: Vec<String>,

    /// `(full name, wire kind)` of entities that disappeared in this run,
    /// each recorded exactly once.
    pub deleted_since_last_run: Vec<(String, String)>,

    /// Crash/resume marker: set before dispatch, cleared after the final
    /// checkpoint of a completed run.
    pub in_progress: bool,
}

impl MetaInfo {
    pub fn new(repo_root: impl Into<PathBuf>, tree: EntityTree) -> Self {
        Self {
            repo_root: repo_root.into(),
            last_processed_revision: String::new(),
            tree,
            shadow_file_map: HashMap::new(),
            skip_files: Vec::new(),
            deleted_since_last_run: Vec::new(),
            in_progress: false,
        }
    }

    /// Record a deletion once, keyed by full name.
    pub fn record_deleted(&mut self, full_name: String, kind: String) {
        if !self
            .deleted_since_last_run
            .iter()
            .any(|(name, _)| *name == full_name)
        {
            self.deleted_since_last_run.push((full_name, kind));
        }
    }

    /// Log a status histogram of the whole tree.
    pub fn log_status_summary(&self) {
        let mut counts = [0usize; 5];
        for id in self.tree.preorder(self.tree.root()) {
            let slot = match self.tree.get(id).status {
                EntityStatus::NotGenerated => 0,
                EntityStatus::UpToDate => 1,
                EntityStatus::CodeChanged => 2,
                EntityStatus::ReferencerRemoved => 3,
                EntityStatus::ReferencerAdded => 4,
            };
            counts[slot] += 1;
        }
        info!(
            "status summary: not_generated={} up_to_date={} code_changed={} referencer_removed={} referencer_added={}",
            counts[0], counts[1], counts[2], counts[3], counts[4]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_recorded_once() {
        let tree = EntityTree::new("repo");
        let mut meta = MetaInfo::new("/tmp/repo", tree);
        meta.record_deleted("a.py/foo".to_string(), "FunctionDef".to_string());
        meta.record_deleted("a.py/foo".to_string(), "FunctionDef".to_string());
        assert_eq!(meta.deleted_since_last_run.len(), 1);
    }
}
