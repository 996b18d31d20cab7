//! Error types for mealrl

use thiserror::Error;

/// Main error type for mealrl
#[derive(Error, Debug)]
pub enum MealRlError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Timed out after {waited_ms}ms waiting for lock on {path}")]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MealRlError {
    /// True for failures while writing or locking the table file.
    ///
    /// The in-memory table stays authoritative when one of these occurs;
    /// only the durable copy lags behind.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            MealRlError::Persistence(_) | MealRlError::LockTimeout { .. } | MealRlError::Io(_)
        )
    }
}

/// Result type alias for mealrl operations
pub type Result<T> = std::result::Result<T, MealRlError>;
