//! Language registry: grammar handles and per-language node-type tables
//! used by the reference resolver and the call-graph builder.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::path::Path;
use tree_sitter::Language as TsLanguage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Java,
    Go,
    Kotlin,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Java,
        Language::Go,
        Language::Kotlin,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::Go => "go",
            Language::Kotlin => "kotlin",
        }
    }

    pub fn from_path(path: &Path) -> Option<Language> {
        match path.extension()?.to_str()? {
            "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "kt" | "kts" => Some(Language::Kotlin),
            _ => None,
        }
    }

    pub fn grammar(&self) -> TsLanguage {
        match self {
            Language::Python => tree_sitter_python::language(),
            Language::Java => tree_sitter_java::language(),
            Language::Go => tree_sitter_go::language(),
            Language::Kotlin => tree_sitter_kotlin::language(),
        }
    }

    pub fn identifier_types(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::Python => &TABLES.python.identifier_types,
            Language::Java => &TABLES.java.identifier_types,
            Language::Go => &TABLES.go.identifier_types,
            Language::Kotlin => &TABLES.kotlin.identifier_types,
        }
    }

    pub fn scope_types(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::Python => &TABLES.python.scope_types,
            Language::Java => &TABLES.java.scope_types,
            Language::Go => &TABLES.go.scope_types,
            Language::Kotlin => &TABLES.kotlin.scope_types,
        }
    }

    pub fn definition_types(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::Python => &TABLES.python.definition_types,
            Language::Java => &TABLES.java.definition_types,
            Language::Go => &TABLES.go.definition_types,
            Language::Kotlin => &TABLES.kotlin.definition_types,
        }
    }

    /// Call-site node types for the call-graph builder.
    pub fn call_types(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::Python => &TABLES.python.call_types,
            Language::Java => &TABLES.java.call_types,
            Language::Go => &TABLES.go.call_types,
            Language::Kotlin => &TABLES.kotlin.call_types,
        }
    }

    /// Root namespaces of common platform libraries; calls into these are
    /// skipped when building the call graph.
    pub fn ignored_namespaces(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::Python => &TABLES.python.ignored_namespaces,
            Language::Java => &TABLES.java.ignored_namespaces,
            Language::Go => &TABLES.go.ignored_namespaces,
            Language::Kotlin => &TABLES.kotlin.ignored_namespaces,
        }
    }

    /// Definition node types that name a function or class, for the
    /// call-graph builder's owner tracking.
    pub fn callable_definition_types(&self) -> &'static HashSet<&'static str> {
        match self {
            Language::Python => &TABLES.python.callable_definition_types,
            Language::Java => &TABLES.java.callable_definition_types,
            Language::Go => &TABLES.go.callable_definition_types,
            Language::Kotlin => &TABLES.kotlin.callable_definition_types,
        }
    }
}

struct LanguageTables {
    identifier_types: HashSet<&'static str>,
    scope_types: HashSet<&'static str>,
    definition_types: HashSet<&'static str>,
    call_types: HashSet<&'static str>,
    ignored_namespaces: HashSet<&'static str>,
    callable_definition_types: HashSet<&'static str>,
}

struct AllTables {
    python: LanguageTables,
    java: LanguageTables,
    go: LanguageTables,
    kotlin: LanguageTables,
}

static TABLES: Lazy<AllTables> = Lazy::new(|| AllTables {
    python: LanguageTables {
        identifier_types: ["identifier", "name"].into_iter().collect(),
        scope_types: [
            "function_definition",
            "class_definition",
            "method_definition",
            "lambda",
            "comprehension",
            "for_statement",
            "with_statement",
        ]
        .into_iter()
        .collect(),
        definition_types: [
            "assignment",
            "augmented_assignment",
            "parameter",
            "function_definition",
            "class_definition",
            "import_statement",
            "import_from_statement",
            "for_statement",
            "with_statement",
        ]
        .into_iter()
        .collect(),
        call_types: ["call", "function_call"].into_iter().collect(),
        ignored_namespaces: [
            "numpy",
            "pandas",
            "collections",
            "os",
            "sys",
            "logging",
            "re",
            "datetime",
            "json",
            "itertools",
        ]
        .into_iter()
        .collect(),
        callable_definition_types: ["function_definition", "class_definition"]
            .into_iter()
            .collect(),
    },
    java: LanguageTables {
        identifier_types: ["identifier"].into_iter().collect(),
        scope_types: [
            "class_declaration",
            "method_declaration",
            "constructor_declaration",
            "block",
            "for_statement",
            "enhanced_for_statement",
            "while_statement",
        ]
        .into_iter()
        .collect(),
        definition_types: [
            "variable_declarator",
            "formal_parameter",
            "catch_formal_parameter",
            "enhanced_for_statement",
            "local_variable_declaration",
        ]
        .into_iter()
        .collect(),
        call_types: ["method_invocation"].into_iter().collect(),
        ignored_namespaces: [
            "java",
            "javax",
            "org.slf4j",
            "com.google",
            "com.fasterxml",
            "junit",
            "org.apache",
            "javax.servlet",
            "org.w3c",
            "org.xml",
        ]
        .into_iter()
        .collect(),
        callable_definition_types: ["method_declaration", "class_declaration"]
            .into_iter()
            .collect(),
    },
    go: LanguageTables {
        identifier_types: ["identifier", "field_identifier", "package_identifier"]
            .into_iter()
            .collect(),
        scope_types: [
            "function_declaration",
            "method_declaration",
            "func_literal",
            "block",
            "for_statement",
            "range_clause",
            "if_statement",
        ]
        .into_iter()
        .collect(),
        definition_types: [
            "var_declaration",
            "short_var_declaration",
            "parameter_declaration",
            "function_declaration",
            "method_declaration",
            "range_clause",
        ]
        .into_iter()
        .collect(),
        call_types: ["call_expression"].into_iter().collect(),
        ignored_namespaces: [
            "fmt", "io", "net", "http", "os", "sync", "context", "time", "bytes", "errors",
        ]
        .into_iter()
        .collect(),
        callable_definition_types: ["function_declaration"].into_iter().collect(),
    },
    kotlin: LanguageTables {
        identifier_types: ["simple_identifier", "identifier"].into_iter().collect(),
        scope_types: [
            "class_declaration",
            "function_declaration",
            "anonymous_function",
            "lambda_literal",
            "for_statement",
            "while_statement",
            "if_expression",
        ]
        .into_iter()
        .collect(),
        definition_types: [
            "variable_declaration",
            "parameter",
            "function_declaration",
            "class_declaration",
            "for_statement",
        ]
        .into_iter()
        .collect(),
        call_types: ["call_expression"].into_iter().collect(),
        ignored_namespaces: [
            "kotlin",
            "java",
            "org.jetbrains",
            "android",
            "com.google",
            "io.reactivex",
            "com.squareup",
            "org.json",
            "org.w3c",
            "javax",
        ]
        .into_iter()
        .collect(),
        callable_definition_types: ["class_declaration", "function_declaration"]
            .into_iter()
            .collect(),
    },
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_detection_by_extension() {
        assert_eq!(Language::from_path(Path::new("a/b.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("Main.java")), Some(Language::Java));
        assert_eq!(Language::from_path(Path::new("main.go")), Some(Language::Go));
        assert_eq!(Language::from_path(Path::new("App.kt")), Some(Language::Kotlin));
        assert_eq!(Language::from_path(Path::new("script.kts")), Some(Language::Kotlin));
        assert_eq!(Language::from_path(&PathBuf::from("notes.txt")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_tables_are_populated() {
        for lang in Language::ALL {
            assert!(!lang.identifier_types().is_empty(), "{}", lang.name());
            assert!(!lang.scope_types().is_empty(), "{}", lang.name());
            assert!(!lang.call_types().is_empty(), "{}", lang.name());
            assert!(!lang.definition_types().is_empty(), "{}", lang.name());
        }
    }

    #[test]
    fn test_python_identifier_types() {
        assert!(Language::Python.identifier_types().contains("identifier"));
        assert!(Language::Python.identifier_types().contains("name"));
        assert!(!Language::Python.identifier_types().contains("call"));
    }
}
