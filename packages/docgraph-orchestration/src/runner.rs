//! One full documentation run: build, reconcile, schedule, dispatch,
//! checkpoint.

use crate::checkpoint::CheckpointStore;
use crate::collab::{DocGenerator, GenerationContext, NeighborDoc};
use crate::error::{OrchestratorError, Result};
use crate::meta::MetaInfo;
use crate::scheduler::{build_task_graph, dispatch};
use crate::sync::{parse_reference, reconcile};
use docgraph_model::{build_tree, AnalysisConfig, EntityId, EntityStatus, EntityTree, StructureRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub deleted: usize,
}

pub struct Runner<G: DocGenerator> {
    config: AnalysisConfig,
    generator: G,
    store: CheckpointStore,
}

impl<G: DocGenerator> Runner<G> {
    pub fn new(config: AnalysisConfig, generator: G) -> Self {
        let store = CheckpointStore::new(config.checkpoint_path());
        Self {
            config,
            generator,
            store,
        }
    }

    /// Execute one run against a fresh structural snapshot. Incremental
    /// when a previous checkpoint exists, full otherwise. Generation
    /// failures roll the entity back and never abort the batch.
    pub fn run(
        &self,
        files: &BTreeMap<String, Vec<StructureRecord>>,
        revision: &str,
    ) -> Result<RunSummary> {
        let tree = build_tree(files, &self.config)?;
        let mut meta = MetaInfo::new(&self.config.repo_root, tree);

        if self.store.exists() {
            let old = self.store.load(&self.config)?;
            meta.shadow_file_map = old.shadow_file_map.clone();
            meta.skip_files = old.skip_files.clone();
            if old.in_progress {
                info!("previous run did not finish, resuming from its checkpoint");
            }
            reconcile(&mut meta, &old.tree, &self.config);
        } else {
            parse_reference(&mut meta, &self.config);
            meta.tree.mark_pending_work(&self.config.ignore_list);
        }
        meta.log_status_summary();

        let manager = build_task_graph(&mut meta.tree, &self.config);
        let scheduled = manager.len();
        let deleted = meta.deleted_since_last_run.len();
        info!("scheduled {} tasks ({} deletions recorded)", scheduled, deleted);

        meta.in_progress = true;
        if let Err(e) = self.store.save(&meta, false) {
            warn!("checkpoint write failed, continuing in memory: {}", e);
        }

        let meta = Arc::new(Mutex::new(meta));
        let manager = Arc::new(Mutex::new(manager));
        let succeeded = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        dispatch(Arc::clone(&manager), self.config.worker_count, |entity| {
            let context = {
                let m = meta.lock();
                build_context(&m.tree, entity)
            };
            match self.generator.generate(&context) {
                Ok(doc) => {
                    let mut m = meta.lock();
                    let limit = self.config.max_doc_versions;
                    let e = m.tree.get_mut(entity);
                    e.doc_versions.push(doc);
                    if e.doc_versions.len() > limit {
                        let excess = e.doc_versions.len() - limit;
                        e.doc_versions.drain(..excess);
                    }
                    e.status = EntityStatus::UpToDate;
                    if let Err(err) = self.store.save(&m, false) {
                        warn!("checkpoint write failed, continuing in memory: {}", err);
                    }
                    succeeded.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(err) => {
                    let mut m = meta.lock();
                    m.tree.get_mut(entity).status = EntityStatus::NotGenerated;
                    failed.fetch_add(1, Ordering::Relaxed);
                    Err(OrchestratorError::Generation {
                        entity: context.full_name.clone(),
                        source: err,
                    }
                    .into())
                }
            }
        });

        let mut meta = Arc::try_unwrap(meta)
            .map_err(|_| OrchestratorError::state("run state still shared after dispatch"))?
            .into_inner();
        meta.in_progress = false;
        meta.last_processed_revision = revision.to_string();
        if let Err(e) = self.store.save(&meta, true) {
            warn!("final checkpoint write failed: {}", e);
        }
        meta.log_status_summary();

        Ok(RunSummary {
            scheduled,
            succeeded: succeeded.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
            deleted,
        })
    }
}

/// Plain-data snapshot for the generator, taken under the run lock.
fn build_context(tree: &EntityTree, id: EntityId) -> GenerationContext {
    let entity = tree.get(id);
    let neighbor = |target: EntityId| NeighborDoc {
        full_name: tree.full_name(target),
        kind: tree.get(target).kind.name().to_string(),
        latest_doc: tree.get(target).latest_doc().map(str::to_string),
    };
    GenerationContext {
        full_name: tree.full_name(id),
        kind: entity.kind.name().to_string(),
        code_text: entity.code_text.clone(),
        params: entity.params.clone(),
        has_return: entity.has_return,
        references_out: entity.refs_out.iter().map(|e| neighbor(e.target)).collect(),
        references_in: entity.refs_in.iter().map(|r| neighbor(*r)).collect(),
        previous_doc: entity.latest_doc().map(str::to_string),
    }
}
