//! Error type for registry, bus and cost operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentsError>;

#[derive(Debug, Error)]
pub enum AgentsError {
    #[error("registry error: {0}")]
    Registry(String),

    #[error("invalid agent definition in {file}: {message}")]
    Definition { file: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
