use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] docgraph_model::ModelError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Generation failed for {entity}: {source}")]
    Generation {
        entity: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Inconsistent analysis state: {0}")]
    State(String),
}

impl OrchestratorError {
    pub fn persistence<E: std::fmt::Display>(e: E) -> Self {
        Self::Persistence(e.to_string())
    }

    pub fn state<E: std::fmt::Display>(e: E) -> Self {
        Self::State(e.to_string())
    }
}
