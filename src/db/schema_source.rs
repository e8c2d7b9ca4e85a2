//! Schema introspection against PostgreSQL `information_schema`

use crate::error::{InsightError, Result};
use crate::schema::{ColumnDescriptor, ForeignKeyDescriptor, SchemaSource, TableSchema, MAX_SAMPLE_ROWS};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::{PgPool, Row};
use tracing::warn;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap();
}

pub struct PgSchemaSource {
    pool: PgPool,
    namespace: String,
}

impl PgSchemaSource {
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self { pool, namespace: namespace.into() }
    }

    /// `"namespace"."table"`, after checking both are plain identifiers.
    fn qualified_name(&self, table: &str) -> Result<String> {
        for part in [self.namespace.as_str(), table] {
            if !IDENTIFIER.is_match(part) {
                return Err(InsightError::SchemaFetch {
                    table: table.to_string(),
                    reason: format!("'{}' is not a plain identifier", part),
                });
            }
        }
        Ok(format!("\"{}\".\"{}\"", self.namespace, table))
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name,
                   data_type::text AS data_type,
                   is_nullable::text AS is_nullable,
                   column_default::text AS column_default,
                   character_maximum_length::int4 AS character_maximum_length
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.namespace)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| InsightError::SchemaFetch {
            table: table.to_string(),
            reason: format!("failed to load columns: {}", e),
        })?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnDescriptor {
                name: row.try_get("column_name").unwrap_or_default(),
                data_type: row.try_get("data_type").unwrap_or_default(),
                is_nullable: row
                    .try_get::<String, _>("is_nullable")
                    .map(|v| !v.eq_ignore_ascii_case("NO"))
                    .unwrap_or(true),
                default_value: row.try_get::<Option<String>, _>("column_default").ok().flatten(),
                max_length: row.try_get::<Option<i32>, _>("character_maximum_length").ok().flatten(),
            })
            .collect())
    }

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT kcu.column_name::text AS column_name,
                   ccu.table_name::text AS referenced_table,
                   ccu.column_name::text AS referenced_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1
              AND tc.table_name = $2
            ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(&self.namespace)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                ForeignKeyDescriptor::new(
                    row.try_get::<String, _>("column_name").unwrap_or_default(),
                    row.try_get::<String, _>("referenced_table").unwrap_or_default(),
                    row.try_get::<String, _>("referenced_column").unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn load_sample(&self, qualified: &str) -> Result<Vec<serde_json::Value>> {
        let sql = format!("SELECT row_to_json(t) FROM {} t LIMIT {}", qualified, MAX_SAMPLE_ROWS);
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn count_rows(&self, qualified: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
              AND table_type = 'BASE TABLE'
              AND table_name NOT LIKE 'pg_%'
            ORDER BY table_name
            "#,
        )
        .bind(&self.namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| InsightError::Database(format!("Failed to list tables: {}", e)))?;

        Ok(names)
    }

    async fn fetch_table(&self, table: &str) -> Result<TableSchema> {
        let qualified = self.qualified_name(table)?;
        let columns = self.load_columns(table).await?;

        // Everything past the column list is optional context.
        let foreign_keys = self.load_foreign_keys(table).await.unwrap_or_else(|e| {
            warn!("Could not fetch foreign keys for {}: {}", table, e);
            Vec::new()
        });
        let sample = self.load_sample(&qualified).await.unwrap_or_else(|e| {
            warn!("Could not fetch sample data for {}: {}", table, e);
            Vec::new()
        });
        let row_count = self.count_rows(&qualified).await.unwrap_or_else(|e| {
            warn!("Could not count rows for {}: {}", table, e);
            sample.len() as u64
        });

        Ok(TableSchema::new(table, columns, foreign_keys, sample, row_count))
    }
}
