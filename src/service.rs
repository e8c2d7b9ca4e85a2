//! Query service
//!
//! Wires schema introspection, the orchestrator and query execution into the
//! three operations the CLI and HTTP server expose.

use crate::chart::ChartType;
use crate::config::{AppConfig, PipelineConfig};
use crate::db::{init_pool, PgQueryExecutor, PgSchemaSource};
use crate::error::{InsightError, Result};
use crate::execution::{QueryExecutor, Row};
use crate::llm::{LanguageModel, LlmClient};
use crate::orchestrator::{QueryOrchestrator, QuerySource};
use crate::schema::{fetch_schemas, SchemaSource, TableSchema, TableSummary};
use crate::sql_validator::SqlValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const GENERIC_FAILURE: &str = "Failed to execute query";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<Row>,
    pub row_count: usize,
    pub execution_time: DateTime<Utc>,
    pub response_message: String,
    pub insights: Vec<String>,
    pub chart_type: ChartType,
    pub source: QuerySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl ErrorResponse {
    /// Caller-facing rendering. Internal failures are reduced to a generic
    /// message so connection strings and model errors never leak.
    pub fn from_error(err: &InsightError) -> Self {
        let error = if err.is_user_visible() {
            err.to_string()
        } else {
            GENERIC_FAILURE.to_string()
        };
        Self { error, query: err.sql().map(str::to_string) }
    }
}

pub struct QueryService {
    source: Arc<dyn SchemaSource>,
    executor: Arc<dyn QueryExecutor>,
    orchestrator: QueryOrchestrator,
    fetch_concurrency: usize,
}

impl QueryService {
    pub fn new(
        pipeline: Arc<PipelineConfig>,
        source: Arc<dyn SchemaSource>,
        model: Arc<dyn LanguageModel>,
        executor: Arc<dyn QueryExecutor>,
        model_timeout: Duration,
        fetch_concurrency: usize,
    ) -> Result<Self> {
        let validator = Arc::new(SqlValidator::new(&pipeline)?);
        let orchestrator = QueryOrchestrator::new(pipeline, validator, model, model_timeout);
        Ok(Self { source, executor, orchestrator, fetch_concurrency: fetch_concurrency.max(1) })
    }

    /// Connects to PostgreSQL and the model endpoint described by `app`.
    pub async fn from_config(app: &AppConfig) -> Result<Self> {
        let api_key = app.require_api_key()?.to_string();
        let pool = init_pool(app.require_database_url()?, app.schema_fetch_concurrency as u32 + 1).await?;

        let source = Arc::new(PgSchemaSource::new(pool.clone(), app.schema_namespace.clone()));
        let executor = Arc::new(PgQueryExecutor::new(pool));
        let model = Arc::new(LlmClient::new(api_key, app.model.clone(), app.base_url.clone()));

        Self::new(
            Arc::new(PipelineConfig::default()),
            source,
            model,
            executor,
            app.llm_timeout,
            app.schema_fetch_concurrency,
        )
    }

    /// Answers `question` against every table in the database.
    pub async fn smart_query(&self, question: &str) -> Result<QueryResponse> {
        let question = require_question(question)?;
        let tables = self.source.list_tables().await?;
        if tables.is_empty() {
            return Err(InsightError::NoFallbackAvailable("No tables found in the database".to_string()));
        }
        info!("Smart query over {} tables", tables.len());
        self.answer(question, &tables).await
    }

    /// Answers `question` using only `selected_tables`.
    pub async fn query(&self, question: &str, selected_tables: &[String]) -> Result<QueryResponse> {
        let question = require_question(question)?;
        if selected_tables.iter().all(|t| t.trim().is_empty()) {
            return Err(InsightError::InvalidRequest(
                "Question and selected tables are required".to_string(),
            ));
        }
        self.answer(question, selected_tables).await
    }

    pub async fn tables(&self) -> Result<Vec<TableSummary>> {
        let tables = self.source.list_tables().await?;
        let schemas = fetch_schemas(Arc::clone(&self.source), &tables, self.fetch_concurrency).await;
        Ok(schemas.iter().map(TableSummary::from).collect())
    }

    async fn answer(&self, question: &str, tables: &[String]) -> Result<QueryResponse> {
        let schemas = self.schemas_for(tables).await?;
        let result = self.orchestrator.run(question, &schemas).await?;

        // The executor only ever sees SQL that passes the validator.
        let sql = self.orchestrator.validator().validate(&result.sql_query)?;
        let results = self.executor.execute(&sql).await?;
        info!("Query returned {} rows ({:?} path)", results.len(), result.source);

        Ok(QueryResponse {
            query: sql,
            row_count: results.len(),
            results,
            execution_time: Utc::now(),
            response_message: result.response_message,
            insights: result.insights,
            chart_type: result.chart_type,
            source: result.source,
        })
    }

    async fn schemas_for(&self, tables: &[String]) -> Result<Vec<TableSchema>> {
        let schemas = fetch_schemas(Arc::clone(&self.source), tables, self.fetch_concurrency).await;
        if schemas.is_empty() {
            warn!("None of {} requested tables could be described", tables.len());
            return Err(InsightError::NoFallbackAvailable(
                "No valid tables found or insufficient permissions".to_string(),
            ));
        }
        Ok(schemas)
    }
}

fn require_question(question: &str) -> Result<&str> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(InsightError::InvalidRequest("Question is required".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_error_response_keeps_user_visible_message_and_sql() {
        let err = InsightError::Execution {
            message: "relation \"ordrs\" does not exist".to_string(),
            sql: "SELECT * FROM ordrs".to_string(),
        };
        let rendered = ErrorResponse::from_error(&err);
        assert!(rendered.error.contains("ordrs"));
        assert_eq!(rendered.query.as_deref(), Some("SELECT * FROM ordrs"));
    }

    #[test]
    fn test_error_response_hides_internal_detail() {
        let err = InsightError::Database("password authentication failed for user admin".to_string());
        let rendered = ErrorResponse::from_error(&err);
        assert_eq!(rendered.error, GENERIC_FAILURE);
        assert!(rendered.query.is_none());

        let err = InsightError::from(ValidationError::NotASelect);
        assert_eq!(ErrorResponse::from_error(&err).error, GENERIC_FAILURE);
    }

    #[test]
    fn test_error_response_json_omits_missing_query() {
        let rendered = ErrorResponse::from_error(&InsightError::InvalidRequest("Question is required".into()));
        let json = serde_json::to_value(&rendered).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Invalid request: Question is required"}));
    }

    #[test]
    fn test_require_question() {
        assert!(matches!(require_question("   "), Err(InsightError::InvalidRequest(_))));
        assert_eq!(require_question("  top products ").unwrap(), "top products");
    }
}
