//! Prompt Builder
//!
//! Combines the schema description, database rules, join hints and the
//! worked-example panel into one instruction prompt. Output depends only on
//! the inputs and the `PipelineConfig`.

use crate::config::{JoinHint, PipelineConfig};
use crate::schema::{SchemaDescriber, TableSchema};
use itertools::Itertools;

/// Closing instruction; every prompt ends with it.
pub const RESPONSE_FORMAT_INSTRUCTION: &str = r#"Return your response as a single JSON object with exactly these four fields and no other text:
{
  "sqlQuery": "your_postgresql_query_here",
  "chartType": "line|bar|pie|table",
  "responseMessage": "your_helpful_business_message_here",
  "insights": ["insight1", "insight2", "insight3", "insight4"]
}"#;

pub struct PromptBuilder<'a> {
    config: &'a PipelineConfig,
    describer: SchemaDescriber,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            describer: SchemaDescriber::new(config.prompt_sample_rows),
        }
    }

    pub fn build(&self, question: &str, schemas: &[TableSchema]) -> String {
        let mut sections: Vec<String> = Vec::new();

        sections.push(
            "You are an expert PostgreSQL developer and data analyst. The database contains business/e-commerce data. Your task is to:\n\
             1. Understand the user's business question\n\
             2. Automatically determine which tables are needed\n\
             3. Generate the appropriate PostgreSQL query\n\
             4. Suggest the best visualization type\n\
             5. Provide helpful insights"
                .to_string(),
        );

        sections.push(format!("AVAILABLE DATABASE SCHEMA:\n{}", self.describer.describe(schemas)));
        sections.push(format!(
            "AVAILABLE TABLES: {}",
            schemas.iter().map(|s| s.name()).join(", ")
        ));

        sections.push(self.database_rules());
        sections.push(self.join_rules(schemas));
        sections.push(bullet_section("BUSINESS CONTEXT UNDERSTANDING:", &self.config.business_context));
        sections.push(bullet_section("CHART TYPE SELECTION RULES:", &self.config.chart_rules));
        sections.push(bullet_section("RESPONSE MESSAGE GUIDELINES:", &self.config.message_guidelines));
        sections.push(self.examples());

        sections.push(format!(
            "Now analyze the user's question: {}\n\n\
             IMPORTANT: Always choose the most relevant tables automatically based on the question. Don't ask the user to select tables.",
            quote(question)
        ));
        sections.push(RESPONSE_FORMAT_INSTRUCTION.to_string());

        sections.join("\n\n")
    }

    fn database_rules(&self) -> String {
        let prohibited = self
            .config
            .forbidden_keywords
            .iter()
            .map(|k| k.to_uppercase())
            .chain(std::iter::once("CREATE".to_string()))
            .join(", ");

        let mut rules = vec![format!(
            "Only generate SELECT queries (never {}, or any other statement that modifies data or schema)",
            prohibited
        )];
        rules.extend(self.config.database_rules.iter().cloned());

        if !self.config.table_aliases.is_empty() {
            let aliases = self
                .config
                .table_aliases
                .iter()
                .map(|(table, alias)| format!("{} for {}", alias, table))
                .join(", ");
            rules.push(format!("Use table aliases ({})", aliases));
        }

        bullet_section("IMPORTANT DATABASE RULES:", &rules)
    }

    /// Configured canonical joins first, then joins derived from the foreign
    /// keys of the tables in play, without duplicates.
    fn join_rules(&self, schemas: &[TableSchema]) -> String {
        let mut hints: Vec<JoinHint> = self.config.join_hints.clone();
        for schema in schemas {
            for fk in schema.foreign_keys() {
                let parent = format!("{}.{}", fk.referenced_table, fk.referenced_column);
                let child = format!("{}.{}", schema.name(), fk.column);
                if !hints.iter().any(|h| h.parent == parent && h.child == child) {
                    hints.push(JoinHint { parent, child, aliased: None });
                }
            }
        }

        let mut lines: Vec<String> = hints.iter().map(JoinHint::render).collect();
        for pattern in &self.config.invalid_column_patterns {
            lines.push(format!("NEVER USE: {} (this column does not exist!)", pattern));
        }

        bullet_section("CRITICAL JOIN RULES:", &lines)
    }

    fn examples(&self) -> String {
        let rendered = self
            .config
            .worked_examples
            .iter()
            .map(|example| {
                let insights = serde_json::to_string(&example.insights).unwrap_or_else(|_| "[]".to_string());
                format!(
                    "Question: {}\nSQL: {}\nCHART: {}\nMESSAGE: {}\nINSIGHTS: {}",
                    quote(&example.question),
                    example.sql,
                    example.chart_type,
                    example.message,
                    insights
                )
            })
            .join("\n\n");

        format!("BUSINESS QUERY EXAMPLES:\n\n{}", rendered)
    }
}

fn bullet_section(title: &str, items: &[String]) -> String {
    let mut out = title.to_string();
    for item in items {
        out.push_str("\n- ");
        out.push_str(item);
    }
    out
}

/// JSON-quotes user text so embedded quotes cannot break out of the prompt line.
fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, ForeignKeyDescriptor};

    fn schemas() -> Vec<TableSchema> {
        vec![
            TableSchema::new(
                "invoices",
                vec![
                    ColumnDescriptor::new("id", "integer", false),
                    ColumnDescriptor::new("order_id", "integer", false),
                    ColumnDescriptor::new("paid_at", "timestamp", true),
                    ColumnDescriptor::new("amount", "numeric", false),
                ],
                vec![ForeignKeyDescriptor::new("order_id", "orders", "id")],
                vec![],
                10,
            ),
            TableSchema::new(
                "shipments",
                vec![ColumnDescriptor::new("invoice_id", "integer", false)],
                vec![ForeignKeyDescriptor::new("invoice_id", "invoices", "id")],
                vec![],
                3,
            ),
        ]
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let config = PipelineConfig::default();
        let builder = PromptBuilder::new(&config);
        let q = "What's our monthly revenue trend?";
        assert_eq!(builder.build(q, &schemas()), builder.build(q, &schemas()));
    }

    #[test]
    fn test_prompt_ends_with_json_instruction() {
        let config = PipelineConfig::default();
        let prompt = PromptBuilder::new(&config).build("anything", &schemas());
        assert!(prompt.ends_with(RESPONSE_FORMAT_INSTRUCTION));
        for field in ["\"sqlQuery\"", "\"chartType\"", "\"responseMessage\"", "\"insights\""] {
            assert!(RESPONSE_FORMAT_INSTRUCTION.contains(field));
        }
    }

    #[test]
    fn test_prompt_embeds_schema_rules_and_examples() {
        let config = PipelineConfig::default();
        let prompt = PromptBuilder::new(&config).build("top products", &schemas());
        assert!(prompt.contains("Table: invoices\nColumns: id (integer NOT NULL)"));
        assert!(prompt.contains("AVAILABLE TABLES: invoices, shipments"));
        assert!(prompt.contains("DROP, DELETE, INSERT, UPDATE, ALTER, TRUNCATE, CREATE"));
        assert!(prompt.contains("orders.id = invoices.order_id (CORRECT: o.id = i.order_id)"));
        assert!(prompt.contains("NEVER USE: o.order_id"));
        assert!(prompt.contains("Question: \"Who are my best customers?\""));
        assert!(prompt.contains("Now analyze the user's question: \"top products\""));
    }

    #[test]
    fn test_foreign_keys_become_join_hints_once() {
        let config = PipelineConfig::default();
        let prompt = PromptBuilder::new(&config).build("q", &schemas());
        // Already a configured hint: not repeated.
        assert_eq!(prompt.matches("- orders.id = invoices.order_id").count(), 1);
        // Derived from the shipments foreign key.
        assert!(prompt.contains("- invoices.id = shipments.invoice_id"));
    }

    #[test]
    fn test_question_quotes_are_escaped() {
        let config = PipelineConfig::default();
        let prompt = PromptBuilder::new(&config).build("say \"hi\"", &[]);
        assert!(prompt.contains(r#"question: "say \"hi\"""#));
    }
}
