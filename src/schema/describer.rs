//! Compact textual schema description used to ground the prompt.

use crate::schema::TableSchema;
use itertools::Itertools;

#[derive(Debug, Clone)]
pub struct SchemaDescriber {
    sample_rows: usize,
}

impl Default for SchemaDescriber {
    fn default() -> Self {
        Self { sample_rows: 2 }
    }
}

impl SchemaDescriber {
    pub fn new(sample_rows: usize) -> Self {
        Self { sample_rows }
    }

    pub fn describe(&self, schemas: &[TableSchema]) -> String {
        schemas.iter().map(|s| self.describe_table(s)).join("\n\n")
    }

    pub fn describe_table(&self, schema: &TableSchema) -> String {
        let columns = schema
            .columns()
            .iter()
            .map(|col| {
                if col.is_nullable {
                    format!("{} ({})", col.name, col.data_type)
                } else {
                    format!("{} ({} NOT NULL)", col.name, col.data_type)
                }
            })
            .join(", ");

        let mut block = format!("Table: {}\nColumns: {}", schema.name(), columns);

        if !schema.foreign_keys().is_empty() {
            let keys = schema
                .foreign_keys()
                .iter()
                .map(|fk| format!("{} -> {}.{}", fk.column, fk.referenced_table, fk.referenced_column))
                .join(", ");
            block.push_str(&format!("\nForeign Keys: {}", keys));
        }

        let shown = &schema.sample_rows()[..schema.sample_rows().len().min(self.sample_rows)];
        if shown.is_empty() {
            block.push_str(&format!("\nTotal Rows: {}", schema.row_count()));
        } else {
            // Serializing a slice of `Value`s cannot fail.
            let sample = serde_json::to_string_pretty(shown).unwrap_or_default();
            block.push_str(&format!(
                "\nSample Data ({} total rows): {}",
                schema.row_count(),
                sample
            ));
        }

        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, ForeignKeyDescriptor};
    use serde_json::json;

    fn orders() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnDescriptor::new("id", "integer", false),
                ColumnDescriptor::new("user_id", "integer", true),
            ],
            vec![ForeignKeyDescriptor::new("user_id", "users", "id")],
            vec![
                json!({"id": 1, "user_id": 7}),
                json!({"id": 2, "user_id": 8}),
                json!({"id": 3, "user_id": 9}),
            ],
            120,
        )
    }

    #[test]
    fn test_describe_table_with_samples() {
        let text = SchemaDescriber::default().describe_table(&orders());
        assert!(text.starts_with("Table: orders\n"));
        assert!(text.contains("Columns: id (integer NOT NULL), user_id (integer)"));
        assert!(text.contains("Foreign Keys: user_id -> users.id"));
        assert!(text.contains("Sample Data (120 total rows)"));
        assert!(text.contains("\"user_id\": 8"));
        // Only the first two samples are rendered.
        assert!(!text.contains("\"user_id\": 9"));
        assert!(!text.contains("Total Rows"));
    }

    #[test]
    fn test_describe_table_without_samples_shows_row_count() {
        let users = TableSchema::new(
            "users",
            vec![ColumnDescriptor::new("email", "text", false)],
            vec![],
            vec![],
            42,
        );
        let text = SchemaDescriber::default().describe_table(&users);
        assert_eq!(text, "Table: users\nColumns: email (text NOT NULL)\nTotal Rows: 42");
    }

    #[test]
    fn test_describe_joins_tables_with_blank_line() {
        let users = TableSchema::new("users", vec![], vec![], vec![], 0);
        let text = SchemaDescriber::new(0).describe(&[orders(), users]);
        assert!(text.contains("Total Rows: 120\n\nTable: users"));
    }
}
