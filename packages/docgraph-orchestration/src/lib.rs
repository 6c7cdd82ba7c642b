//! Orchestration for incremental repository documentation: run state,
//! reference-graph sync, topological scheduling, concurrent dispatch, and
//! checkpoint persistence.

pub mod checkpoint;
pub mod collab;
pub mod error;
pub mod meta;
pub mod runner;
pub mod scheduler;
pub mod sync;

pub use checkpoint::{CheckpointStore, EntityRecord, ReferenceRecord};
pub use collab::{ChangeDetector, DocGenerator, FileDiff, GenerationContext, NeighborDoc};
pub use error::{OrchestratorError, Result};
pub use meta::MetaInfo;
pub use runner::{RunSummary, Runner};
pub use scheduler::{build_task_graph, dispatch, Task, TaskManager, TaskState};
pub use sync::{parse_reference, reconcile};

/// Install the default tracing subscriber, filtered by `RUST_LOG` with an
/// `info` fallback. Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
