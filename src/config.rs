//! Configuration
//!
//! `PipelineConfig` holds the immutable rule data shared by the prompt builder
//! and the SQL validator. `AppConfig` holds deployment settings read from the
//! environment.

use crate::chart::ChartType;
use crate::error::{InsightError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rewrite of one historically wrong join expression into its correct form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinFixup {
    /// Case-insensitive regular expression matched against the SQL text.
    pub pattern: String,
    pub replacement: String,
}

/// Canonical join path between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinHint {
    /// `table.column` on the referenced side
    pub parent: String,
    /// `table.column` on the referencing side
    pub child: String,
    /// Same condition written with the conventional table aliases
    pub aliased: Option<String>,
}

impl JoinHint {
    pub fn render(&self) -> String {
        match &self.aliased {
            Some(aliased) => format!("{} = {} (CORRECT: {})", self.parent, self.child, aliased),
            None => format!("{} = {}", self.parent, self.child),
        }
    }
}

/// Question → SQL → chart → message → insights, used to anchor the model's output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkedExample {
    pub question: String,
    pub sql: String,
    pub chart_type: ChartType,
    pub message: String,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rejected anywhere in the text as standalone words.
    pub forbidden_keywords: Vec<String>,
    /// Object kinds that make `CREATE <kind>` a rejection.
    pub forbidden_create_targets: Vec<String>,
    /// Column references known not to exist in the schema.
    pub invalid_column_patterns: Vec<String>,
    pub join_fixups: Vec<JoinFixup>,
    pub join_hints: Vec<JoinHint>,
    /// (table, alias) pairs the model is told to use.
    pub table_aliases: Vec<(String, String)>,
    pub database_rules: Vec<String>,
    pub business_context: Vec<String>,
    pub chart_rules: Vec<String>,
    pub message_guidelines: Vec<String>,
    pub worked_examples: Vec<WorkedExample>,
    /// Sample rows rendered per table in the schema description.
    pub prompt_sample_rows: usize,
    pub max_insights: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forbidden_keywords: strings(&["drop", "delete", "insert", "update", "alter", "truncate"]),
            forbidden_create_targets: strings(&[
                "table", "database", "index", "view", "function", "procedure", "trigger",
            ]),
            invalid_column_patterns: strings(&["o.order_id"]),
            join_fixups: vec![
                JoinFixup {
                    pattern: r"o\.order_id\s*=\s*o\.id".to_string(),
                    replacement: "o.id = i.order_id".to_string(),
                },
                JoinFixup {
                    pattern: r"orders\.order_id\s*=\s*orders\.id".to_string(),
                    replacement: "orders.id = invoices.order_id".to_string(),
                },
            ],
            join_hints: vec![
                JoinHint {
                    parent: "orders.id".to_string(),
                    child: "invoices.order_id".to_string(),
                    aliased: Some("o.id = i.order_id".to_string()),
                },
                JoinHint {
                    parent: "users.id".to_string(),
                    child: "orders.user_id".to_string(),
                    aliased: Some("u.id = o.user_id".to_string()),
                },
                JoinHint {
                    parent: "products.id".to_string(),
                    child: "order_items.product_id".to_string(),
                    aliased: Some("p.id = oi.product_id".to_string()),
                },
                JoinHint {
                    parent: "orders.id".to_string(),
                    child: "order_items.order_id".to_string(),
                    aliased: Some("o.id = oi.order_id".to_string()),
                },
            ],
            table_aliases: vec![
                ("users".to_string(), "u".to_string()),
                ("orders".to_string(), "o".to_string()),
                ("order_items".to_string(), "oi".to_string()),
                ("products".to_string(), "p".to_string()),
                ("invoices".to_string(), "i".to_string()),
            ],
            database_rules: strings(&[
                "Use proper PostgreSQL syntax and functions",
                "Use appropriate JOINs when querying multiple tables",
                "Add meaningful column aliases for calculated fields",
                "Use LIMIT 50 unless user asks for \"all\" or specifies a number",
                "Use aggregate functions (COUNT, SUM, AVG, MAX, MIN) when appropriate",
                "For \"top\" or \"highest\" queries, use ORDER BY with LIMIT",
                "For date/time analysis, use DATE_TRUNC for grouping by periods",
                "Do NOT include semicolons at the end of the query",
                "Format numbers and dates appropriately",
                "Use COALESCE for handling null values in calculations",
                "Always include relevant context columns for better understanding",
            ]),
            business_context: strings(&[
                "Revenue queries: Use paid invoices (invoices with paid_at NOT NULL) for actual revenue",
                "Customer analysis: Join users with their orders/purchases",
                "Product performance: Use order_items to see what's actually selling",
                "Sales trends: Group by time periods using DATE_TRUNC",
                "Top performers: Use ORDER BY with LIMIT",
                "Recent activity: Use date filters like created_at >= CURRENT_DATE - INTERVAL 'X days'",
            ]),
            chart_rules: strings(&[
                "'line': Time series data, trends over time, temporal analysis (monthly sales, growth trends)",
                "'bar': Comparisons, rankings, categories (top customers, product performance, category breakdown)",
                "'pie': Distributions, percentages, parts of whole (market share, category splits)",
                "'table': Detailed listings, specific records, when users want to see individual items",
            ]),
            message_guidelines: strings(&[
                "Be conversational and business-focused",
                "Explain what the data shows in simple terms",
                "Mention key business insights",
                "Use natural language, avoid technical jargon",
                "Address the user directly (\"Here's your...\" or \"Your data shows...\")",
            ]),
            worked_examples: default_worked_examples(),
            prompt_sample_rows: 2,
            max_insights: 4,
        }
    }
}

fn default_worked_examples() -> Vec<WorkedExample> {
    vec![
        WorkedExample {
            question: "What's our monthly revenue trend?".to_string(),
            sql: "SELECT DATE_TRUNC('month', i.paid_at) as month, SUM(i.amount) as revenue, COUNT(DISTINCT i.order_id) as orders_paid FROM invoices i WHERE i.paid_at IS NOT NULL AND i.paid_at >= CURRENT_DATE - INTERVAL '12 months' GROUP BY month ORDER BY month".to_string(),
            chart_type: ChartType::Line,
            message: "Here's your monthly revenue trend based on actually paid invoices over the past year. This shows your real cash flow and business growth patterns.".to_string(),
            insights: strings(&[
                "12 months of actual revenue data",
                "Based on paid invoices only",
                "Shows seasonal business patterns",
                "Includes order volume metrics",
            ]),
        },
        WorkedExample {
            question: "Who are my best customers?".to_string(),
            sql: "SELECT u.first_name || ' ' || u.last_name as customer_name, u.email, COUNT(o.id) as total_orders, SUM(COALESCE(i.amount, 0)) as total_paid, MAX(o.created_at) as last_order_date FROM users u LEFT JOIN orders o ON u.id = o.user_id LEFT JOIN invoices i ON o.id = i.order_id AND i.paid_at IS NOT NULL GROUP BY u.id, u.first_name, u.last_name, u.email HAVING COUNT(o.id) > 0 ORDER BY total_paid DESC LIMIT 20".to_string(),
            chart_type: ChartType::Bar,
            message: "Here are your top customers ranked by total payments received. These are your most valuable customers who actually pay their invoices.".to_string(),
            insights: strings(&[
                "Top 20 paying customers",
                "Includes contact information",
                "Shows purchase frequency",
                "Based on actual payments received",
            ]),
        },
        WorkedExample {
            question: "Which products sell best?".to_string(),
            sql: "SELECT p.name as product_name, p.category, COUNT(oi.id) as times_ordered, SUM(oi.quantity) as total_quantity_sold, SUM(oi.quantity * oi.price) as total_revenue FROM products p JOIN order_items oi ON p.id = oi.product_id GROUP BY p.id, p.name, p.category ORDER BY total_quantity_sold DESC LIMIT 20".to_string(),
            chart_type: ChartType::Bar,
            message: "Here are your best-selling products by quantity sold, along with their revenue contribution and order frequency.".to_string(),
            insights: strings(&[
                "Top 20 products by sales volume",
                "Includes revenue per product",
                "Shows category distribution",
                "Order frequency included",
            ]),
        },
        WorkedExample {
            question: "Show me recent unpaid orders".to_string(),
            sql: "SELECT u.first_name || ' ' || u.last_name as customer_name, u.email, o.id as order_id, o.total_amount, o.status, o.created_at, CASE WHEN i.id IS NULL THEN 'No Invoice' ELSE 'Invoice Created' END as invoice_status FROM orders o JOIN users u ON o.user_id = u.id LEFT JOIN invoices i ON o.id = i.order_id WHERE (i.paid_at IS NULL OR i.id IS NULL) AND o.created_at >= CURRENT_DATE - INTERVAL '30 days' ORDER BY o.created_at DESC LIMIT 30".to_string(),
            chart_type: ChartType::Table,
            message: "Here are your recent orders from the last 30 days that haven't been paid yet. This helps you track which customers need payment follow-up.".to_string(),
            insights: strings(&[
                "Last 30 days of unpaid orders",
                "Customer contact info included",
                "Invoice status tracking",
                "Sorted by order date",
            ]),
        },
        WorkedExample {
            question: "How many new customers this month?".to_string(),
            sql: "SELECT DATE_TRUNC('month', created_at) as month, COUNT(*) as new_customers FROM users WHERE created_at >= DATE_TRUNC('month', CURRENT_DATE) GROUP BY month".to_string(),
            chart_type: ChartType::Bar,
            message: "Here's your new customer acquisition for the current month compared to previous months.".to_string(),
            insights: strings(&[
                "Current month customer growth",
                "Monthly comparison available",
                "New user registrations tracked",
            ]),
        },
    ]
}

/// Deployment settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub database_url: Option<String>,
    pub llm_timeout: Duration,
    pub schema_fetch_concurrency: usize,
    pub schema_namespace: String,
    pub server_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            database_url: None,
            llm_timeout: Duration::from_secs(30),
            schema_fetch_concurrency: 4,
            schema_namespace: "public".to_string(),
            server_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_timeout = match non_empty("LLM_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number(&raw, "LLM_TIMEOUT_SECS")?),
            None => defaults.llm_timeout,
        };
        let schema_fetch_concurrency = match non_empty("SCHEMA_FETCH_CONCURRENCY") {
            Some(raw) => parse_number::<usize>(&raw, "SCHEMA_FETCH_CONCURRENCY")?.max(1),
            None => defaults.schema_fetch_concurrency,
        };

        Ok(Self {
            api_key: non_empty("OPENAI_API_KEY"),
            model: non_empty("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            database_url: non_empty("DATABASE_URL"),
            llm_timeout,
            schema_fetch_concurrency,
            schema_namespace: non_empty("SCHEMA_NAMESPACE").unwrap_or(defaults.schema_namespace),
            server_addr: non_empty("SERVER_ADDR").unwrap_or(defaults.server_addr),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| InsightError::Config("OPENAI_API_KEY is not set".to_string()))
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| InsightError::Config("DATABASE_URL is not set".to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| InsightError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}
