//! Error type for store operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Atomic claim lost: the task was no longer `pending`
    #[error("task is busy: {0}")]
    Busy(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Task nesting beyond the supported depth
    #[error("task tree too deep: limit is {limit}")]
    DepthLimit { limit: usize },

    #[error("invalid status {value:?} for {entity}")]
    InvalidStatus { entity: &'static str, value: String },

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
