//! Code model for incremental repository documentation.
//!
//! Builds a hierarchical entity tree out of structural records, resolves
//! cross-entity references over tree-sitter syntax trees, and condenses the
//! function call graph for cycle-aware consumers.

pub mod builder;
pub mod callgraph;
pub mod config;
pub mod entity;
pub mod error;
pub mod lang;
pub mod record;
pub mod resolver;

pub use builder::build_tree;
pub use callgraph::{CallGraphBuilder, CondensedGraph};
pub use config::{AllowListEntry, AnalysisConfig};
pub use entity::{Entity, EntityId, EntityKind, EntityStatus, EntityTree, RefEdge};
pub use error::{ModelError, Result};
pub use lang::Language;
pub use record::{RecordKind, StructureRecord};
pub use resolver::{RefHit, RefQuery, ReferenceResolver};
