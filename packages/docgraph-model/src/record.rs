//! Structural records: the wire format produced by the external
//! syntax-tree parser, one ordered list per file.

use serde::{Deserialize, Serialize};

/// Wire vocabulary for record kinds. Narrower than the in-memory
/// `EntityKind`: methods and nested functions all serialize as
/// `FunctionDef` and are re-derived from the parent kind on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    ClassDef,
    FunctionDef,
    GlobalVar,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ClassDef => "ClassDef",
            RecordKind::FunctionDef => "FunctionDef",
            RecordKind::GlobalVar => "GlobalVar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ClassDef" => Some(RecordKind::ClassDef),
            "FunctionDef" => Some(RecordKind::FunctionDef),
            "GlobalVar" => Some(RecordKind::GlobalVar),
            _ => None,
        }
    }
}

/// One structural record as delivered by the structure provider.
/// Line numbers are 1-based inclusive; `name_column` is 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub kind: RecordKind,
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
}

impl StructureRecord {
    /// Strict containment by line range. Identical ranges never contain
    /// each other.
    pub fn contains(&self, other: &StructureRecord) -> bool {
        if self.start_line == other.start_line && self.end_line == other.end_line {
            return false;
        }
        self.start_line <= other.start_line && other.end_line <= self.end_line
    }

    pub fn span(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }
}
