//! Read-only execution of validated SQL on PostgreSQL

use crate::error::{InsightError, Result};
use crate::execution::{QueryExecutor, Row};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};

pub struct PgQueryExecutor {
    pool: PgPool,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run(&self, sql: &str) -> std::result::Result<serde_json::Value, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;

        let rows: serde_json::Value = sqlx::query_scalar(&aggregate_sql(sql)).fetch_one(&mut *tx).await?;

        tx.rollback().await?;
        Ok(rows)
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        debug!("Executing: {}", sql);
        let value = self.run(sql).await.map_err(|e| {
            error!("SQL execution error: {}", e);
            InsightError::Execution { message: e.to_string(), sql: sql.to_string() }
        })?;
        rows_from_json(value, sql)
    }
}

/// Folds the result set into one JSON array. The closing parenthesis goes on
/// its own line so a trailing `--` comment cannot swallow it.
fn aggregate_sql(sql: &str) -> String {
    format!("SELECT COALESCE(json_agg(q), '[]'::json) FROM (\n{}\n) q", sql)
}

fn rows_from_json(value: serde_json::Value, sql: &str) -> Result<Vec<Row>> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(InsightError::Execution {
                message: format!("unexpected result shape: {}", other),
                sql: sql.to_string(),
            })
        }
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Object(map) => map,
            // Rows of a single unnamed scalar column.
            other => {
                let mut map = Row::new();
                map.insert("value".to_string(), other);
                map
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_from_json_array() {
        let rows = rows_from_json(json!([{"id": 1, "email": "a@b.c"}, {"id": 2, "email": null}]), "SELECT 1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["email"], json!("a@b.c"));
        assert_eq!(rows[1]["email"], json!(null));
    }

    #[test]
    fn test_rows_keep_select_list_order() {
        let value: serde_json::Value = serde_json::from_str(r#"[{"status":"paid","count":3,"avg_total":12.5}]"#).unwrap();
        let rows = rows_from_json(value, "SELECT status, COUNT(*) as count, AVG(total) as avg_total FROM orders").unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["status", "count", "avg_total"]);
    }

    #[test]
    fn test_aggregate_sql_survives_trailing_line_comment() {
        let wrapped = aggregate_sql("SELECT id FROM orders -- newest first");
        assert!(wrapped.ends_with("-- newest first\n) q"));
        let last_line = wrapped.lines().last().unwrap();
        assert_eq!(last_line, ") q");
    }

    #[test]
    fn test_rows_from_unexpected_shape_is_execution_error() {
        let err = rows_from_json(json!({"error": "boom"}), "SELECT x").unwrap_err();
        assert_eq!(err.sql(), Some("SELECT x"));
    }
}
