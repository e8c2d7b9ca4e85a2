//! Table schema metadata
//!
//! Schemas are built fresh for every request from the introspection
//! collaborator and are read-only once constructed.

pub mod describer;
pub mod introspect;

pub use describer::SchemaDescriber;
pub use introspect::{fetch_schemas, SchemaSource, TableSummary};

use serde::{Deserialize, Serialize};

/// At most this many sample rows are kept per table.
pub const MAX_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i32>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable,
            default_value: None,
            max_length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDescriptor {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl ForeignKeyDescriptor {
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDescriptor>,
    foreign_keys: Vec<ForeignKeyDescriptor>,
    sample_rows: Vec<serde_json::Value>,
    row_count: u64,
}

impl TableSchema {
    /// Duplicate foreign keys are dropped (first occurrence wins) and the
    /// sample is truncated to `MAX_SAMPLE_ROWS`.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        foreign_keys: Vec<ForeignKeyDescriptor>,
        mut sample_rows: Vec<serde_json::Value>,
        row_count: u64,
    ) -> Self {
        let mut unique_keys: Vec<ForeignKeyDescriptor> = Vec::with_capacity(foreign_keys.len());
        for fk in foreign_keys {
            if !unique_keys.contains(&fk) {
                unique_keys.push(fk);
            }
        }
        sample_rows.truncate(MAX_SAMPLE_ROWS);

        Self {
            name: name.into(),
            columns,
            foreign_keys: unique_keys,
            sample_rows,
            row_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn foreign_keys(&self) -> &[ForeignKeyDescriptor] {
        &self.foreign_keys
    }

    pub fn sample_rows(&self) -> &[serde_json::Value] {
        &self.sample_rows
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column))
    }
}
