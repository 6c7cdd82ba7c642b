//! Topological task scheduling and concurrent dispatch.
//!
//! The task graph is built single-threaded from the entity tree; dispatch
//! runs a fixed worker pool against one shared manager behind a coarse
//! lock. The dependency discipline (a task never starts before its
//! blockers finish) is what makes per-entity mutation safe without
//! fine-grained locks.

use docgraph_model::{AnalysisConfig, EntityId, EntityTree};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
}

#[derive(Debug)]
pub struct Task {
    pub id: usize,
    pub blocking: HashSet<usize>,
    pub entity: EntityId,
    pub state: TaskState,
}

/// Shared task map. All methods are called under one external lock; the
/// manager itself never blocks.
#[derive(Debug, Default)]
pub struct TaskManager {
    tasks: BTreeMap<usize, Task>,
    next_id: usize,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, entity: EntityId, blocking: HashSet<usize>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                id,
                blocking,
                entity,
                state: TaskState::Pending,
            },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pop the lowest-id ready task and mark it in-flight in the same
    /// critical section, so two workers can never pick the same task.
    pub fn next_task(&mut self) -> Option<(usize, EntityId)> {
        let ready = self
            .tasks
            .values()
            .find(|t| t.state == TaskState::Pending && t.blocking.is_empty())
            .map(|t| (t.id, t.entity))?;
        if let Some(task) = self.tasks.get_mut(&ready.0) {
            task.state = TaskState::InFlight;
        }
        Some(ready)
    }

    /// Remove a finished task and purge its id from every blocking set.
    pub fn mark_completed(&mut self, id: usize) {
        self.tasks.remove(&id);
        for task in self.tasks.values_mut() {
            task.blocking.remove(&id);
        }
    }
}

/// Build the task graph for every eligible entity, writing the assigned
/// task id back into the tree. Returns the populated manager.
///
/// Selection order: entities sorted by depth, then repeatedly pick the
/// entity with the fewest unresolved strong blockers (pending children and
/// pending non-weak reference targets). A zero-strong entity is taken
/// immediately; otherwise the cycle is broken by fewest total blockers
/// with a lexical full-name tie-break, logged as a warning.
pub fn build_task_graph(tree: &mut EntityTree, config: &AnalysisConfig) -> TaskManager {
    let mut manager = TaskManager::new();

    let mut remaining: Vec<EntityId> = tree
        .preorder(tree.root())
        .into_iter()
        .filter(|id| tree.needs_generation(*id, &config.ignore_list))
        .filter(|id| match &config.allow_list {
            None => true,
            Some(allow) => {
                let full_name = tree.full_name(*id);
                let name = &tree.get(*id).name;
                allow.iter().any(|entry| {
                    full_name.starts_with(&entry.file_path) && *name == entry.name
                })
            }
        })
        .collect();
    remaining.sort_by_key(|id| tree.get(*id).depth);

    while !remaining.is_empty() {
        let pending: HashSet<EntityId> = remaining.iter().copied().collect();
        let mut chosen: Option<usize> = None;
        let mut fallback: Option<(usize, usize, String)> = None; // (strong, total, name)
        let mut fallback_idx = 0usize;

        for (idx, id) in remaining.iter().enumerate() {
            let (strong, total) = blocker_counts(tree, *id, &pending);
            if strong == 0 {
                chosen = Some(idx);
                break;
            }
            let name = tree.full_name(*id);
            let key = (strong, total, name);
            let better = match &fallback {
                None => true,
                Some(best) => (key.0, key.1, &key.2) < (best.0, best.1, &best.2),
            };
            if better {
                fallback = Some(key);
                fallback_idx = idx;
            }
        }

        let idx = match chosen {
            Some(idx) => idx,
            None => {
                let (strong, total, name) = fallback.take().unwrap_or((0, 0, String::new()));
                warn!(
                    "scheduling cycle broken at {} (strong={} total={})",
                    name, strong, total
                );
                fallback_idx
            }
        };
        let id = remaining.remove(idx);

        let mut blocking = HashSet::new();
        for (_, child) in &tree.get(id).children {
            if let Some(task_id) = tree.get(*child).task_id {
                blocking.insert(task_id);
            }
        }
        for edge in &tree.get(id).refs_out {
            if let Some(task_id) = tree.get(edge.target).task_id {
                blocking.insert(task_id);
            }
        }
        let task_id = manager.add_task(id, blocking);
        tree.get_mut(id).task_id = Some(task_id);
        debug!("scheduled {} as task {}", tree.full_name(id), task_id);
    }

    manager
}

/// (strong, total) unresolved blockers of `id` among the still-pending
/// set: children plus reference targets, weak edges counting only toward
/// the total.
fn blocker_counts(tree: &EntityTree, id: EntityId, pending: &HashSet<EntityId>) -> (usize, usize) {
    let mut strong = 0usize;
    let mut total = 0usize;
    for (_, child) in &tree.get(id).children {
        if pending.contains(child) {
            strong += 1;
            total += 1;
        }
    }
    for edge in &tree.get(id).refs_out {
        if pending.contains(&edge.target) {
            total += 1;
            if !edge.weak {
                strong += 1;
            }
        }
    }
    (strong, total)
}

/// Run the worker pool to exhaustion. Each worker atomically claims a
/// ready task, runs the handler outside the lock, and completes the task
/// whether the handler succeeded or not; a failure is logged and left to
/// the handler's own status rollback.
pub fn dispatch<F>(manager: Arc<Mutex<TaskManager>>, worker_count: usize, handler: F)
where
    F: Fn(EntityId) -> anyhow::Result<()> + Send + Sync,
{
    let workers = worker_count.max(1);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let manager = Arc::clone(&manager);
            let handler = &handler;
            scope.spawn(move || loop {
                let claimed = {
                    let mut m = manager.lock();
                    if m.is_empty() {
                        return;
                    }
                    m.next_task()
                };
                match claimed {
                    Some((task_id, entity)) => {
                        if let Err(e) = handler(entity) {
                            warn!("task {} failed: {:#}", task_id, e);
                        }
                        manager.lock().mark_completed(task_id);
                    }
                    None => std::thread::sleep(IDLE_WAIT),
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_model::{Entity, EntityKind, EntityStatus};

    fn tree_with_functions(names: &[&str]) -> (EntityTree, Vec<EntityId>) {
        let mut tree = EntityTree::new("repo");
        let file = tree.alloc(Entity::new(EntityKind::File, "a.py"));
        tree.add_child(tree.root(), file);
        let ids = names
            .iter()
            .map(|name| {
                let id = tree.alloc(Entity::new(EntityKind::Function, *name));
                tree.add_child(file, id);
                id
            })
            .collect();
        tree.finalize();
        (tree, ids)
    }

    #[test]
    fn test_referenced_entity_scheduled_first() {
        let (mut tree, ids) = tree_with_functions(&["foo", "bar"]);
        let (foo, bar) = (ids[0], ids[1]);
        tree.add_reference(bar, foo, false);

        let config = AnalysisConfig::new("/tmp/repo");
        let manager = build_task_graph(&mut tree, &config);

        assert_eq!(manager.len(), 2);
        let foo_task = tree.get(foo).task_id.unwrap();
        let bar_task = tree.get(bar).task_id.unwrap();
        assert!(foo_task < bar_task);

        let mut m = manager;
        let (first, entity) = m.next_task().unwrap();
        assert_eq!(first, foo_task);
        assert_eq!(entity, foo);
        // bar is blocked until foo completes
        assert!(m.next_task().is_none());
        m.mark_completed(first);
        assert_eq!(m.next_task().unwrap().0, bar_task);
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let (mut tree, ids) = tree_with_functions(&["f", "g"]);
        let (f, g) = (ids[0], ids[1]);
        tree.add_reference(f, g, false);
        tree.add_reference(g, f, false);

        let config = AnalysisConfig::new("/tmp/repo");
        let manager = build_task_graph(&mut tree, &config);
        assert_eq!(manager.len(), 2);
        // lexical tie-break picks f first; g then blocks on f
        assert!(tree.get(f).task_id.unwrap() < tree.get(g).task_id.unwrap());
    }

    #[test]
    fn test_weak_edges_discounted_in_cycle_break() {
        let (mut tree, ids) = tree_with_functions(&["f", "g"]);
        let (f, g) = (ids[0], ids[1]);
        // f -> g strong, g -> f weak: g has zero strong blockers
        tree.add_reference(f, g, false);
        tree.add_reference(g, f, true);

        let config = AnalysisConfig::new("/tmp/repo");
        let manager = build_task_graph(&mut tree, &config);
        assert_eq!(manager.len(), 2);
        assert!(tree.get(g).task_id.unwrap() < tree.get(f).task_id.unwrap());
    }

    #[test]
    fn test_up_to_date_entities_not_scheduled() {
        let (mut tree, ids) = tree_with_functions(&["foo", "bar"]);
        for id in &ids {
            tree.get_mut(*id).status = EntityStatus::UpToDate;
        }
        let config = AnalysisConfig::new("/tmp/repo");
        let manager = build_task_graph(&mut tree, &config);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_children_block_parent() {
        let mut tree = EntityTree::new("repo");
        let file = tree.alloc(Entity::new(EntityKind::File, "a.py"));
        tree.add_child(tree.root(), file);
        let class = tree.alloc(Entity::new(EntityKind::Class, "C"));
        tree.add_child(file, class);
        let method = tree.alloc(Entity::new(EntityKind::Method, "m"));
        tree.add_child(class, method);
        tree.finalize();

        let config = AnalysisConfig::new("/tmp/repo");
        let manager = build_task_graph(&mut tree, &config);
        assert_eq!(manager.len(), 2);
        assert!(tree.get(method).task_id.unwrap() < tree.get(class).task_id.unwrap());

        let mut m = manager;
        let (method_task, _) = m.next_task().unwrap();
        assert!(m.next_task().is_none());
        m.mark_completed(method_task);
        assert_eq!(m.next_task().unwrap().1, class);
    }

    #[test]
    fn test_dispatch_runs_every_task_in_dependency_order() {
        let (mut tree, ids) = tree_with_functions(&["foo", "bar"]);
        let (foo, bar) = (ids[0], ids[1]);
        tree.add_reference(bar, foo, false);

        let config = AnalysisConfig::new("/tmp/repo").with_workers(4);
        let manager = Arc::new(Mutex::new(build_task_graph(&mut tree, &config)));

        let order = Arc::new(Mutex::new(Vec::new()));
        let order_ref = Arc::clone(&order);
        dispatch(Arc::clone(&manager), config.worker_count, move |entity| {
            order_ref.lock().push(entity);
            Ok(())
        });

        assert!(manager.lock().is_empty());
        let order = order.lock();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], foo);
        assert_eq!(order[1], bar);
    }

    #[test]
    fn test_dispatch_continues_after_handler_failure() {
        let (mut tree, _) = tree_with_functions(&["foo", "bar"]);
        let config = AnalysisConfig::new("/tmp/repo").with_workers(2);
        let manager = Arc::new(Mutex::new(build_task_graph(&mut tree, &config)));

        let ran = Arc::new(Mutex::new(0usize));
        let ran_ref = Arc::clone(&ran);
        dispatch(Arc::clone(&manager), config.worker_count, move |_| {
            *ran_ref.lock() += 1;
            Err(anyhow::anyhow!("generator unavailable"))
        });

        assert!(manager.lock().is_empty());
        assert_eq!(*ran.lock(), 2);
    }
}
