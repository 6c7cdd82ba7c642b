//! Hierarchical code model.
//!
//! Entities live in an arena addressed by stable integer ids. Ownership is
//! strictly the parent -> children map; every other link (parent back-ref,
//! ancestor path, reference edges) is a plain id, safe under aliasing and
//! cycles.

use crate::record::RecordKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// Stable arena index of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Repo,
    Dir,
    File,
    Class,
    Function,
    Method,
    NestedFunction,
    GlobalVar,
}

impl EntityKind {
    /// True for nodes that never hold documentation directly.
    pub fn is_container(&self) -> bool {
        matches!(self, EntityKind::Repo | EntityKind::Dir | EntityKind::File)
    }

    pub fn is_function_like(&self) -> bool {
        matches!(
            self,
            EntityKind::Function | EntityKind::Method | EntityKind::NestedFunction
        )
    }

    /// Folding onto the narrower wire vocabulary. Several in-memory kinds
    /// map to one wire string; `classify` re-derives them on load.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            EntityKind::Repo => "Repo",
            EntityKind::Dir => "Dir",
            EntityKind::File => "File",
            EntityKind::Class => "ClassDef",
            EntityKind::Function | EntityKind::Method | EntityKind::NestedFunction => "FunctionDef",
            EntityKind::GlobalVar => "GlobalVar",
        }
    }

    /// Classify a record kind against the parent's kind.
    pub fn classify(record: RecordKind, parent: EntityKind) -> EntityKind {
        match record {
            RecordKind::ClassDef => EntityKind::Class,
            RecordKind::GlobalVar => EntityKind::GlobalVar,
            RecordKind::FunctionDef => match parent {
                EntityKind::Class => EntityKind::Method,
                EntityKind::Function | EntityKind::Method | EntityKind::NestedFunction => {
                    EntityKind::NestedFunction
                }
                _ => EntityKind::Function,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Repo => "Repo",
            EntityKind::Dir => "Dir",
            EntityKind::File => "File",
            EntityKind::Class => "Class",
            EntityKind::Function => "Function",
            EntityKind::Method => "Method",
            EntityKind::NestedFunction => "NestedFunction",
            EntityKind::GlobalVar => "GlobalVar",
        }
    }
}

/// Documentation status state machine.
///
/// `NotGenerated` -> `UpToDate` on successful generation; `UpToDate` decays
/// to one of the change states when reconciliation detects the relevant
/// change. Only `UpToDate` means "skip".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    NotGenerated,
    UpToDate,
    CodeChanged,
    ReferencerRemoved,
    ReferencerAdded,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::NotGenerated => "not_generated",
            EntityStatus::UpToDate => "up_to_date",
            EntityStatus::CodeChanged => "code_changed",
            EntityStatus::ReferencerRemoved => "referencer_removed",
            EntityStatus::ReferencerAdded => "referencer_added",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_generated" => Some(EntityStatus::NotGenerated),
            "up_to_date" => Some(EntityStatus::UpToDate),
            "code_changed" => Some(EntityStatus::CodeChanged),
            "referencer_removed" => Some(EntityStatus::ReferencerRemoved),
            "referencer_added" => Some(EntityStatus::ReferencerAdded),
            _ => None,
        }
    }
}

/// Outgoing reference edge. `weak` marks an edge whose matched line equals
/// the referencing entity's own defining line (a function naming itself in
/// its signature); weak edges are discounted when breaking scheduling cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEdge {
    pub target: EntityId,
    pub weak: bool,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub status: EntityStatus,
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub params: Vec<String>,
    pub code_text: String,
    pub name_column: u32,
    pub has_return: bool,

    /// Ordered, newest last.
    pub doc_versions: Vec<String>,

    /// Insertion-ordered child map; keys are unique among siblings
    /// (collisions suffixed at build time).
    pub children: Vec<(String, EntityId)>,
    pub parent: Option<EntityId>,

    /// 0 for leaves, else 1 + max child depth.
    pub depth: u32,
    /// Root-first chain terminating at self. Populated by `finalize`.
    pub ancestor_path: Vec<EntityId>,

    pub refs_out: Vec<RefEdge>,
    pub refs_in: Vec<EntityId>,

    /// Referencer full names carried over from the previous checkpoint;
    /// compared against the freshly resolved set during reconciliation.
    pub refs_in_names: Vec<String>,

    /// OR of descendants' eligibility; meaningful on containers.
    pub has_pending_work: bool,

    /// Sentinel `None` = unscheduled.
    pub task_id: Option<usize>,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            status: EntityStatus::NotGenerated,
            name: name.into(),
            start_line: 0,
            end_line: 0,
            params: Vec::new(),
            code_text: String::new(),
            name_column: 0,
            has_return: false,
            doc_versions: Vec::new(),
            children: Vec::new(),
            parent: None,
            depth: 0,
            ancestor_path: Vec::new(),
            refs_out: Vec::new(),
            refs_in: Vec::new(),
            refs_in_names: Vec::new(),
            has_pending_work: false,
            task_id: None,
        }
    }

    pub fn latest_doc(&self) -> Option<&str> {
        self.doc_versions.last().map(String::as_str)
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Arena-backed entity tree. The root is always a `Repo` entity.
#[derive(Debug, Clone)]
pub struct EntityTree {
    arena: Vec<Entity>,
    root: EntityId,
}

impl EntityTree {
    pub fn new(repo_name: impl Into<String>) -> Self {
        let root = Entity::new(EntityKind::Repo, repo_name);
        Self {
            arena: vec![root],
            root: EntityId(0),
        }
    }

    pub fn root(&self) -> EntityId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, id: EntityId) -> &Entity {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.arena[id.index()]
    }

    pub fn alloc(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.arena.len() as u32);
        self.arena.push(entity);
        id
    }

    /// Attach `child` under `parent` with a unique sibling key. Name
    /// collisions get a deterministic numeric suffix. Returns the key
    /// actually used.
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) -> String {
        let desired = self.get(child).name.clone();
        let mut key = desired.clone();
        if self.child_by_key(parent, &key).is_some() {
            let mut suffix = 0usize;
            while self
                .child_by_key(parent, &format!("{}_{}", desired, suffix))
                .is_some()
            {
                suffix += 1;
            }
            key = format!("{}_{}", desired, suffix);
            warn!(
                "name collision under {}: {} renamed to {}",
                self.full_name(parent),
                desired,
                key
            );
        }
        self.get_mut(parent).children.push((key.clone(), child));
        self.get_mut(child).parent = Some(parent);
        key
    }

    pub fn child_by_key(&self, parent: EntityId, key: &str) -> Option<EntityId> {
        self.get(parent)
            .children
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, id)| *id)
    }

    /// The key of `id` in its parent's child map (the suffixed name).
    pub fn child_key(&self, id: EntityId) -> Option<&str> {
        let parent = self.get(id).parent?;
        self.get(parent)
            .children
            .iter()
            .find(|(_, cid)| *cid == id)
            .map(|(k, _)| k.as_str())
    }

    /// Slash-joined child keys from (but excluding) the root down to `id`.
    /// For a file this is its repository-relative path.
    pub fn full_name(&self, id: EntityId) -> String {
        let mut segments = Vec::new();
        let mut now = id;
        while let Some(parent) = self.get(now).parent {
            if let Some(key) = self.child_key(now) {
                segments.push(key.to_string());
            }
            now = parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Walk down from the root following path segments by child key.
    pub fn find_path(&self, segments: &[&str]) -> Option<EntityId> {
        let mut now = self.root;
        for segment in segments {
            now = self.child_by_key(now, segment)?;
        }
        Some(now)
    }

    /// Pre-order traversal from `from`, iterative.
    pub fn preorder(&self, from: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            // reversed so that children come out in insertion order
            for (_, child) in self.get(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// All file entities, in pre-order.
    pub fn files(&self) -> Vec<EntityId> {
        self.preorder(self.root)
            .into_iter()
            .filter(|id| self.get(*id).kind == EntityKind::File)
            .collect()
    }

    /// Descend from `file` choosing at each level the child whose range
    /// contains `line`, until no child qualifies. Returns the owning entity
    /// (the file itself when nothing inside contains the line).
    pub fn entity_at_line(&self, file: EntityId, line: u32) -> EntityId {
        let mut now = file;
        loop {
            let next = self
                .get(now)
                .children
                .iter()
                .map(|(_, id)| *id)
                .find(|id| self.get(*id).contains_line(line));
            match next {
                Some(child) => now = child,
                None => return now,
            }
        }
    }

    /// True if one of `a`/`b` lies on the other's ancestor path.
    pub fn has_ancestor_relation(&self, a: EntityId, b: EntityId) -> bool {
        self.get(a).ancestor_path.contains(&b) || self.get(b).ancestor_path.contains(&a)
    }

    /// Compute `ancestor_path` and `depth` for every node. Must run after
    /// the tree shape is final; both are required by the scheduler.
    pub fn finalize(&mut self) {
        // ancestor paths, top-down
        for id in self.preorder(self.root) {
            let mut path = match self.get(id).parent {
                Some(parent) => self.get(parent).ancestor_path.clone(),
                None => Vec::new(),
            };
            path.push(id);
            self.get_mut(id).ancestor_path = path;
        }
        // depths, bottom-up over the reversed pre-order
        for id in self.preorder(self.root).into_iter().rev() {
            let depth = self
                .get(id)
                .children
                .iter()
                .map(|(_, child)| self.get(*child).depth + 1)
                .max()
                .unwrap_or(0);
            self.get_mut(id).depth = depth;
        }
    }

    /// Eligibility predicate: needs (re)generation and is not ignored.
    /// Containers never hold documentation themselves.
    pub fn needs_generation(&self, id: EntityId, ignore_list: &[String]) -> bool {
        let entity = self.get(id);
        if entity.status == EntityStatus::UpToDate {
            return false;
        }
        if entity.kind.is_container() {
            return false;
        }
        // must live inside a file
        if !entity
            .ancestor_path
            .iter()
            .any(|a| self.get(*a).kind == EntityKind::File)
        {
            return false;
        }
        let full_name = self.full_name(id);
        !ignore_list.iter().any(|prefix| full_name.starts_with(prefix))
    }

    /// Propagate the eligibility OR up through containers.
    pub fn mark_pending_work(&mut self, ignore_list: &[String]) {
        for id in self.preorder(self.root).into_iter().rev() {
            let mut pending = self.needs_generation(id, ignore_list);
            pending |= self
                .get(id)
                .children
                .iter()
                .any(|(_, child)| self.get(*child).has_pending_work);
            self.get_mut(id).has_pending_work = pending;
        }
    }

    /// Add a bidirectional reference edge unless it already exists.
    /// Returns false when dropped as a duplicate.
    pub fn add_reference(&mut self, referencer: EntityId, target: EntityId, weak: bool) -> bool {
        if self
            .get(referencer)
            .refs_out
            .iter()
            .any(|edge| edge.target == target)
        {
            return false;
        }
        self.get_mut(referencer).refs_out.push(RefEdge { target, weak });
        self.get_mut(target).refs_in.push(referencer);
        true
    }

    /// Strict full names of an entity's incoming referencers.
    pub fn refs_in_names(&self, id: EntityId) -> HashSet<String> {
        self.get(id)
            .refs_in
            .iter()
            .map(|r| self.full_name(*r))
            .collect()
    }

    /// Clear all resolved reference edges (before a fresh resolution pass).
    pub fn clear_references(&mut self) {
        for entity in &mut self.arena {
            entity.refs_out.clear();
            entity.refs_in.clear();
        }
    }
}
