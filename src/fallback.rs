//! Fallback Query Generator
//!
//! Deterministic keyword-driven decision table used whenever the model output
//! is missing, unparseable or rejected. Entries are evaluated top-down; the
//! first whose keywords match the question and whose required tables all
//! exist wins. Every returned query has already passed the validator.

use crate::error::{InsightError, Result};
use crate::schema::TableSchema;
use crate::sql_validator::SqlValidator;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Revenue,
    Customer,
    Product,
    Order,
    Recency,
    Ranking,
    /// Matches every question.
    Any,
}

lazy_static! {
    static ref REVENUE: Regex =
        Regex::new(r"(?i)\b(revenue|sales|money|income|earnings|profit)s?\b").unwrap();
    static ref CUSTOMER: Regex = Regex::new(r"(?i)\b(customer|client|user|buyer)s?\b").unwrap();
    static ref PRODUCT: Regex = Regex::new(r"(?i)\b(product|item|inventory|catalog)s?\b").unwrap();
    static ref ORDER: Regex = Regex::new(r"(?i)\b(order|purchase|transaction)s?\b").unwrap();
    static ref RECENCY: Regex =
        Regex::new(r"(?i)\b(recent|latest|new|today|this month|this week)\b").unwrap();
    static ref RANKING: Regex = Regex::new(r"(?i)\b(top|best|highest|most)\b").unwrap();
    static ref SAFE_IDENTIFIER: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
}

impl Topic {
    pub fn matches(&self, question: &str) -> bool {
        match self {
            Topic::Revenue => REVENUE.is_match(question),
            Topic::Customer => CUSTOMER.is_match(question),
            Topic::Product => PRODUCT.is_match(question),
            Topic::Order => ORDER.is_match(question),
            Topic::Recency => RECENCY.is_match(question),
            Topic::Ranking => RANKING.is_match(question),
            Topic::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackTemplate {
    pub name: &'static str,
    pub topic: Topic,
    pub required_tables: &'static [&'static str],
    pub sql: &'static str,
}

/// Priority order is the order of this table.
pub const TEMPLATES: &[FallbackTemplate] = &[
    FallbackTemplate {
        name: "revenue_from_invoices",
        topic: Topic::Revenue,
        required_tables: &["invoices"],
        sql: "SELECT DATE_TRUNC('month', paid_at) as month, SUM(amount) as revenue, COUNT(*) as paid_invoices FROM invoices WHERE paid_at IS NOT NULL AND paid_at >= CURRENT_DATE - INTERVAL '6 months' GROUP BY month ORDER BY month",
    },
    FallbackTemplate {
        name: "revenue_from_orders",
        topic: Topic::Revenue,
        required_tables: &["orders"],
        sql: "SELECT DATE_TRUNC('month', created_at) as month, SUM(total_amount) as revenue, COUNT(*) as orders FROM orders WHERE created_at >= CURRENT_DATE - INTERVAL '6 months' GROUP BY month ORDER BY month",
    },
    FallbackTemplate {
        name: "customers_with_orders",
        topic: Topic::Customer,
        required_tables: &["users", "orders"],
        sql: "SELECT u.first_name || ' ' || u.last_name as customer_name, u.email, COUNT(o.id) as order_count, COALESCE(SUM(o.total_amount), 0) as total_spent FROM users u LEFT JOIN orders o ON u.id = o.user_id GROUP BY u.id, u.first_name, u.last_name, u.email ORDER BY total_spent DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "customers",
        topic: Topic::Customer,
        required_tables: &["users"],
        sql: "SELECT first_name, last_name, email, created_at FROM users ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "products_with_sales",
        topic: Topic::Product,
        required_tables: &["products", "order_items"],
        sql: "SELECT p.name, p.category, p.price, COUNT(oi.id) as times_ordered, SUM(oi.quantity) as total_sold FROM products p LEFT JOIN order_items oi ON p.id = oi.product_id GROUP BY p.id, p.name, p.category, p.price ORDER BY total_sold DESC NULLS LAST LIMIT 20",
    },
    FallbackTemplate {
        name: "products",
        topic: Topic::Product,
        required_tables: &["products"],
        sql: "SELECT name, category, price, created_at FROM products ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "orders_with_customers",
        topic: Topic::Order,
        required_tables: &["orders", "users"],
        sql: "SELECT o.id, u.first_name || ' ' || u.last_name as customer_name, o.total_amount, o.status, o.created_at FROM orders o JOIN users u ON o.user_id = u.id ORDER BY o.created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "orders",
        topic: Topic::Order,
        required_tables: &["orders"],
        sql: "SELECT id, user_id, total_amount, status, created_at FROM orders ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "recent_orders",
        topic: Topic::Recency,
        required_tables: &["orders"],
        sql: "SELECT id, user_id, total_amount, status, created_at FROM orders WHERE created_at >= CURRENT_DATE - INTERVAL '7 days' ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "recent_users",
        topic: Topic::Recency,
        required_tables: &["users"],
        sql: "SELECT first_name, last_name, email, created_at FROM users WHERE created_at >= CURRENT_DATE - INTERVAL '30 days' ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "top_products",
        topic: Topic::Ranking,
        required_tables: &["products", "order_items"],
        sql: "SELECT p.name, SUM(oi.quantity) as total_sold, SUM(oi.quantity * oi.price) as revenue FROM products p JOIN order_items oi ON p.id = oi.product_id GROUP BY p.id, p.name ORDER BY total_sold DESC LIMIT 10",
    },
    FallbackTemplate {
        name: "top_customers",
        topic: Topic::Ranking,
        required_tables: &["users", "orders"],
        sql: "SELECT u.first_name || ' ' || u.last_name as customer_name, COUNT(o.id) as order_count, SUM(o.total_amount) as total_spent FROM users u JOIN orders o ON u.id = o.user_id GROUP BY u.id, u.first_name, u.last_name ORDER BY total_spent DESC LIMIT 10",
    },
    FallbackTemplate {
        name: "default_orders",
        topic: Topic::Any,
        required_tables: &["orders"],
        sql: "SELECT id, user_id, total_amount, status, created_at FROM orders ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "default_users",
        topic: Topic::Any,
        required_tables: &["users"],
        sql: "SELECT first_name, last_name, email, created_at FROM users ORDER BY created_at DESC LIMIT 20",
    },
    FallbackTemplate {
        name: "default_products",
        topic: Topic::Any,
        required_tables: &["products"],
        sql: "SELECT name, category, price, created_at FROM products ORDER BY created_at DESC LIMIT 20",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackQuery {
    /// Template name, or `first_table` for the generic last resort.
    pub template: String,
    pub sql: String,
}

pub struct FallbackQueryGenerator<'a> {
    validator: &'a SqlValidator,
}

impl<'a> FallbackQueryGenerator<'a> {
    pub fn new(validator: &'a SqlValidator) -> Self {
        Self { validator }
    }

    pub fn generate(&self, question: &str, schemas: &[TableSchema]) -> Result<FallbackQuery> {
        // Exact match: templates use unquoted lowercase names, which would not
        // resolve against a table created as `"Orders"`.
        let has_table = |name: &str| schemas.iter().any(|s| s.name() == name);

        for template in TEMPLATES {
            if !template.topic.matches(question) {
                continue;
            }
            if !template.required_tables.iter().all(|t| has_table(t)) {
                continue;
            }
            if let Ok(sql) = self.validator.validate(template.sql) {
                debug!("Fallback template '{}' selected", template.name);
                return Ok(FallbackQuery { template: template.name.to_string(), sql });
            }
        }

        // Last resort: browse the first table that can be queried safely.
        for schema in schemas {
            if !SAFE_IDENTIFIER.is_match(schema.name()) {
                continue;
            }
            let candidate = if schema.has_column("id") {
                format!("SELECT * FROM {} ORDER BY id DESC LIMIT 10", schema.name())
            } else {
                format!("SELECT * FROM {} LIMIT 10", schema.name())
            };
            if let Ok(sql) = self.validator.validate(&candidate) {
                debug!("Fallback browsing first table '{}'", schema.name());
                return Ok(FallbackQuery { template: "first_table".to_string(), sql });
            }
        }

        Err(InsightError::NoFallbackAvailable(format!(
            "no fallback template applies to \"{}\" with {} available table(s)",
            question,
            schemas.len()
        )))
    }
}
