use std::time::Duration;
use thiserror::Error;

/// Rejection reasons produced by the SQL validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Only SELECT queries are allowed")]
    NotASelect,

    #[error("Invalid column reference: {pattern} does not exist")]
    InvalidColumn { pattern: String },

    #[error("Dangerous operation \"{keyword}\" not allowed")]
    ForbiddenOperation { keyword: String },
}

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Schema fetch error for table '{table}': {reason}")]
    SchemaFetch { table: String, reason: String },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model call timed out after {0:?}")]
    ModelTimeout(Duration),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("No suitable fallback query could be generated: {0}")]
    NoFallbackAvailable(String),

    #[error("Query execution failed: {message}")]
    Execution { message: String, sql: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InsightError {
    /// Failures that reach the caller as-is. Everything on the model path is
    /// absorbed by the fallback generator before it gets this far.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            InsightError::NoFallbackAvailable(_)
                | InsightError::Execution { .. }
                | InsightError::InvalidRequest(_)
        )
    }

    /// SQL text attached to the failure, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            InsightError::Execution { sql, .. } => Some(sql.as_str()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for InsightError {
    fn from(err: sqlx::Error) -> Self {
        InsightError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
