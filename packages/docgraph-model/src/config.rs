//! Analysis configuration.
//!
//! One explicit value constructed by the caller and passed by reference into
//! the builder, the resolver, and the scheduler. There is no global settings
//! singleton.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Entry of the optional allow-list: restrict analysis and scheduling to
/// specific named entities inside specific files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListEntry {
    pub file_path: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Absolute path of the repository under analysis.
    pub repo_root: PathBuf,

    /// Full-name prefixes excluded from generation.
    pub ignore_list: Vec<String>,

    /// Optional allow-list; `None` means every entity is in scope.
    pub allow_list: Option<Vec<AllowListEntry>>,

    /// Minimum normalized string similarity for the import-path heuristic.
    /// Tunable, not a semantic guarantee.
    pub import_similarity_threshold: f64,

    /// Size of the dispatch worker pool.
    pub worker_count: usize,

    /// Directory (relative to `repo_root`) holding the checkpoint documents.
    pub checkpoint_dir: String,

    /// Number of doc versions retained per entity; older versions are
    /// truncated from the front on append.
    pub max_doc_versions: usize,
}

impl AnalysisConfig {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            ignore_list: Vec::new(),
            allow_list: None,
            import_similarity_threshold: 0.6,
            worker_count: num_cpus::get(),
            checkpoint_dir: ".docgraph".to_string(),
            max_doc_versions: 8,
        }
    }

    pub fn with_ignore_list(mut self, ignore_list: Vec<String>) -> Self {
        self.ignore_list = ignore_list;
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.repo_root.join(&self.checkpoint_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold() {
        let config = AnalysisConfig::new("/tmp/repo");
        assert!((config.import_similarity_threshold - 0.6).abs() < f64::EPSILON);
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn test_checkpoint_path_is_under_repo_root() {
        let config = AnalysisConfig::new("/tmp/repo");
        assert_eq!(config.checkpoint_path(), PathBuf::from("/tmp/repo/.docgraph"));
    }
}
