//! Query execution boundary.

use crate::error::Result;
use async_trait::async_trait;

/// One result row: column name → value.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs already-validated SQL read-only. Any failure is reported as
    /// `InsightError::Execution` carrying the attempted SQL.
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}
