use async_trait::async_trait;
use insight_sql::chart::ChartType;
use insight_sql::config::PipelineConfig;
use insight_sql::error::{InsightError, Result};
use insight_sql::execution::{QueryExecutor, Row};
use insight_sql::llm::LanguageModel;
use insight_sql::orchestrator::QuerySource;
use insight_sql::schema::{ColumnDescriptor, SchemaSource, TableSchema};
use insight_sql::service::{ErrorResponse, QueryService};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MemorySource {
    tables: Vec<TableSchema>,
}

#[async_trait]
impl SchemaSource for MemorySource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name().to_string()).collect())
    }

    async fn fetch_table(&self, table: &str) -> Result<TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name() == table)
            .cloned()
            .ok_or_else(|| InsightError::SchemaFetch {
                table: table.to_string(),
                reason: "relation does not exist".to_string(),
            })
    }
}

struct FixedModel(String);

#[async_trait]
impl LanguageModel for FixedModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Records every statement it is asked to run.
#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        self.seen.lock().unwrap().push(sql.to_string());
        if let Some(message) = &self.fail_with {
            return Err(InsightError::Execution { message: message.clone(), sql: sql.to_string() });
        }
        let row = json!({"id": 1, "status": "paid"});
        Ok(vec![row.as_object().cloned().unwrap_or_default()])
    }
}

fn orders_table() -> TableSchema {
    TableSchema::new(
        "orders",
        vec![
            ColumnDescriptor::new("id", "integer", false),
            ColumnDescriptor::new("status", "text", true),
            ColumnDescriptor::new("created_at", "timestamp", true),
        ],
        vec![],
        vec![],
        2,
    )
}

fn service(tables: Vec<TableSchema>, reply: &str, executor: Arc<RecordingExecutor>) -> QueryService {
    QueryService::new(
        Arc::new(PipelineConfig::default()),
        Arc::new(MemorySource { tables }),
        Arc::new(FixedModel(reply.to_string())),
        executor,
        Duration::from_secs(5),
        2,
    )
    .unwrap()
}

#[tokio::test]
async fn test_smart_query_executes_model_sql() {
    let executor = Arc::new(RecordingExecutor::default());
    let reply = r#"{"sqlQuery": "SELECT id, status FROM orders;", "chartType": "table", "responseMessage": "Your orders", "insights": ["1 order"]}"#;
    let svc = service(vec![orders_table()], reply, Arc::clone(&executor));

    let response = svc.smart_query("show me orders").await.unwrap();

    assert_eq!(response.query, "SELECT id, status FROM orders");
    assert_eq!(response.row_count, 1);
    assert_eq!(response.results[0]["status"], json!("paid"));
    assert_eq!(response.chart_type, ChartType::Table);
    assert_eq!(response.source, QuerySource::Model);
    assert_eq!(*executor.seen.lock().unwrap(), vec!["SELECT id, status FROM orders".to_string()]);

    let wire = serde_json::to_value(&response).unwrap();
    for key in ["query", "results", "rowCount", "executionTime", "responseMessage", "insights", "chartType"] {
        assert!(wire.get(key).is_some(), "missing {}", key);
    }
}

#[tokio::test]
async fn test_rejected_model_sql_never_reaches_executor() {
    let executor = Arc::new(RecordingExecutor::default());
    let reply = r#"{"sqlQuery": "DELETE FROM orders"}"#;
    let svc = service(vec![orders_table()], reply, Arc::clone(&executor));

    let response = svc.query("recent orders", &["orders".to_string()]).await.unwrap();

    assert_eq!(response.source, QuerySource::Fallback);
    let seen = executor.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with("SELECT"));
    assert!(!seen[0].to_lowercase().contains("delete"));
}

#[tokio::test]
async fn test_execution_error_carries_attempted_sql() {
    let executor = Arc::new(RecordingExecutor {
        fail_with: Some("column \"statuz\" does not exist".to_string()),
        ..Default::default()
    });
    let reply = r#"{"sqlQuery": "SELECT statuz FROM orders"}"#;
    let svc = service(vec![orders_table()], reply, executor);

    let err = svc.smart_query("order statuses").await.unwrap_err();
    let rendered = ErrorResponse::from_error(&err);

    assert_eq!(rendered.query.as_deref(), Some("SELECT statuz FROM orders"));
    assert!(rendered.error.contains("statuz"));
}

#[tokio::test]
async fn test_empty_question_is_invalid_request() {
    let svc = service(vec![orders_table()], "{}", Arc::new(RecordingExecutor::default()));
    assert!(matches!(svc.smart_query("  ").await, Err(InsightError::InvalidRequest(_))));
    assert!(matches!(svc.query("orders", &[]).await, Err(InsightError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_no_tables_is_terminal() {
    let svc = service(vec![], "{}", Arc::new(RecordingExecutor::default()));
    match svc.smart_query("revenue").await {
        Err(InsightError::NoFallbackAvailable(message)) => {
            assert_eq!(message, "No tables found in the database")
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.query)),
    }
}

#[tokio::test]
async fn test_unknown_selected_tables_are_reported() {
    let svc = service(vec![orders_table()], "{}", Arc::new(RecordingExecutor::default()));
    match svc.query("revenue", &["ghosts".to_string()]).await {
        Err(InsightError::NoFallbackAvailable(message)) => {
            assert_eq!(message, "No valid tables found or insufficient permissions")
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.query)),
    }
}

#[tokio::test]
async fn test_tables_lists_columns_and_counts() {
    let svc = service(vec![orders_table()], "{}", Arc::new(RecordingExecutor::default()));
    let tables = svc.tables().await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "orders");
    assert_eq!(tables[0].columns.len(), 3);
    assert_eq!(tables[0].row_count, 2);
}
