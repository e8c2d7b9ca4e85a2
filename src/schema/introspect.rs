//! Schema introspection boundary
//!
//! Per-table metadata is fetched concurrently (bounded by a semaphore). A
//! table whose fetch fails is logged and left out of the schema set; it never
//! aborts the other tables.

use crate::error::{InsightError, Result};
use crate::schema::{ColumnDescriptor, TableSchema};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Names of every queryable base table, in a stable order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Full metadata for one table. Missing foreign keys or samples are
    /// reported as empty collections; a table that cannot be described at
    /// all yields `InsightError::SchemaFetch`.
    async fn fetch_table(&self, table: &str) -> Result<TableSchema>;
}

/// Table listing entry exposed to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: u64,
}

impl From<&TableSchema> for TableSummary {
    fn from(schema: &TableSchema) -> Self {
        Self {
            name: schema.name().to_string(),
            columns: schema.columns().to_vec(),
            row_count: schema.row_count(),
        }
    }
}

/// Fetches `tables` with at most `concurrency` introspection calls in flight.
/// Output preserves input order; tables that fail or have no columns are omitted.
pub async fn fetch_schemas(
    source: Arc<dyn SchemaSource>,
    tables: &[String],
    concurrency: usize,
) -> Vec<TableSchema> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, table) in tables.iter().enumerate() {
        let source = Arc::clone(&source);
        let permits = Arc::clone(&permits);
        let table = table.clone();
        tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => source.fetch_table(&table).await,
                Err(_) => Err(InsightError::SchemaFetch {
                    table: table.clone(),
                    reason: "introspection limiter closed".to_string(),
                }),
            };
            (index, table, result)
        });
    }

    let mut fetched: Vec<(usize, TableSchema)> = Vec::with_capacity(tables.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, _, Ok(schema))) if !schema.columns().is_empty() => {
                debug!("Fetched schema for {} ({} columns)", schema.name(), schema.columns().len());
                fetched.push((index, schema));
            }
            Ok((_, table, Ok(_))) => {
                warn!("Skipping table {}: no columns visible", table);
            }
            Ok((_, table, Err(e))) => {
                warn!("Skipping table {}: {}", table, e);
            }
            Err(e) => {
                warn!("Schema fetch task failed: {}", e);
            }
        }
    }

    fetched.sort_by_key(|(index, _)| *index);
    fetched.into_iter().map(|(_, schema)| schema).collect()
}
