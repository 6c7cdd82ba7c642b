use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported language for file: {0}")]
    UnsupportedLanguage(PathBuf),

    #[error("Grammar error: {0}")]
    Grammar(String),

    #[error("Failed to parse file: {0}")]
    Parse(PathBuf),

    #[error("Structural inconsistency: {0}")]
    Inconsistency(String),
}

impl ModelError {
    pub fn grammar<E: std::fmt::Display>(e: E) -> Self {
        Self::Grammar(e.to_string())
    }

    pub fn inconsistency<E: std::fmt::Display>(e: E) -> Self {
        Self::Inconsistency(e.to_string())
    }
}
