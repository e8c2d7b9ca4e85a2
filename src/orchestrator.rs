//! Query Orchestrator
//!
//! Turns a question plus schema set into a validated `SmartQueryResult`:
//!
//! ```text
//! BUILDING_PROMPT -> AWAITING_MODEL -> PARSING -> VALIDATING -> SUCCEEDED -> DONE
//!                          \              \            \
//!                           +--------------+------------+--> FALLING_BACK -> DONE
//! ```
//!
//! Every model-path failure (transport, timeout, unparseable reply, rejected
//! SQL) is absorbed and routed to the fallback generator. Model SQL is never
//! retried. Only a fallback failure propagates.

use crate::chart::{ChartType, ChartTypeClassifier};
use crate::config::PipelineConfig;
use crate::error::{InsightError, Result};
use crate::fallback::FallbackQueryGenerator;
use crate::llm::LanguageModel;
use crate::prompt::PromptBuilder;
use crate::response_parser::{ParsedResponse, ResponseParser};
use crate::schema::TableSchema;
use crate::sql_validator::SqlValidator;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    BuildingPrompt,
    AwaitingModel,
    Parsing,
    Validating,
    Succeeded,
    FallingBack,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::BuildingPrompt => "BUILDING_PROMPT",
            PipelineState::AwaitingModel => "AWAITING_MODEL",
            PipelineState::Parsing => "PARSING",
            PipelineState::Validating => "VALIDATING",
            PipelineState::Succeeded => "SUCCEEDED",
            PipelineState::FallingBack => "FALLING_BACK",
            PipelineState::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    Model,
    Fallback,
}

/// Sole output contract of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartQueryResult {
    /// Validated; starts with SELECT.
    pub sql_query: String,
    pub chart_type: ChartType,
    pub response_message: String,
    /// At most `PipelineConfig::max_insights` entries.
    pub insights: Vec<String>,
    pub source: QuerySource,
    /// Visited states, in order.
    #[serde(skip)]
    pub trace: Vec<PipelineState>,
}

pub struct QueryOrchestrator {
    config: Arc<PipelineConfig>,
    validator: Arc<SqlValidator>,
    model: Arc<dyn LanguageModel>,
    model_timeout: Duration,
    parser: ResponseParser,
    classifier: ChartTypeClassifier,
}

impl QueryOrchestrator {
    pub fn new(
        config: Arc<PipelineConfig>,
        validator: Arc<SqlValidator>,
        model: Arc<dyn LanguageModel>,
        model_timeout: Duration,
    ) -> Self {
        Self {
            config,
            validator,
            model,
            model_timeout,
            parser: ResponseParser::new(),
            classifier: ChartTypeClassifier::new(),
        }
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    pub fn build_prompt(&self, question: &str, schemas: &[TableSchema]) -> String {
        PromptBuilder::new(&self.config).build(question, schemas)
    }

    pub async fn run(&self, question: &str, schemas: &[TableSchema]) -> Result<SmartQueryResult> {
        let mut trace = Vec::new();

        match self.model_path(question, schemas, &mut trace).await {
            Ok(mut result) => {
                enter(&mut trace, PipelineState::Succeeded);
                enter(&mut trace, PipelineState::Done);
                info!("Model query accepted ({} chart)", result.chart_type);
                result.trace = trace;
                Ok(result)
            }
            Err(reason) => {
                warn!("Falling back to deterministic query: {}", reason);
                enter(&mut trace, PipelineState::FallingBack);
                let mut result = self.fallback(question, schemas)?;
                enter(&mut trace, PipelineState::Done);
                result.trace = trace;
                Ok(result)
            }
        }
    }

    async fn model_path(
        &self,
        question: &str,
        schemas: &[TableSchema],
        trace: &mut Vec<PipelineState>,
    ) -> Result<SmartQueryResult> {
        enter(trace, PipelineState::BuildingPrompt);
        let prompt = self.build_prompt(question, schemas);

        enter(trace, PipelineState::AwaitingModel);
        let reply = match tokio::time::timeout(self.model_timeout, self.model.complete(&prompt)).await {
            Ok(reply) => reply?,
            Err(_) => return Err(InsightError::ModelTimeout(self.model_timeout)),
        };

        enter(trace, PipelineState::Parsing);
        let parsed = self.parser.parse(&reply)?;

        enter(trace, PipelineState::Validating);
        let sql = self.validator.validate(parsed.sql_query.as_deref().unwrap_or_default())?;

        Ok(self.model_result(question, schemas, sql, parsed))
    }

    fn model_result(
        &self,
        question: &str,
        schemas: &[TableSchema],
        sql: String,
        parsed: ParsedResponse,
    ) -> SmartQueryResult {
        let tables = table_list(schemas);

        let chart_type = parsed
            .chart_type
            .as_deref()
            .and_then(|c| c.parse::<ChartType>().ok())
            .unwrap_or_else(|| self.classifier.classify(question));

        let (response_message, insights) = if parsed.salvaged {
            (
                format!(
                    "I've analyzed your question \"{}\" and generated a query based on your available data.",
                    question
                ),
                vec![
                    format!("Analysis completed for: {}", question),
                    format!("Using available tables: {}", tables),
                ],
            )
        } else {
            (
                parsed
                    .response_message
                    .unwrap_or_else(|| format!("Here's the analysis for your question: \"{}\"", question)),
                parsed.insights.unwrap_or_else(|| {
                    vec![
                        format!("Analysis completed for: {}", question),
                        format!("Tables analyzed: {}", tables),
                    ]
                }),
            )
        };

        SmartQueryResult {
            sql_query: sql,
            chart_type,
            response_message,
            insights: self.cap(insights),
            source: QuerySource::Model,
            trace: Vec::new(),
        }
    }

    fn fallback(&self, question: &str, schemas: &[TableSchema]) -> Result<SmartQueryResult> {
        let generated = FallbackQueryGenerator::new(&self.validator).generate(question, schemas)?;
        debug!("Fallback template: {}", generated.template);

        // Generated SQL is validated again before it leaves the orchestrator.
        let sql = self.validator.validate(&generated.sql).map_err(|e| {
            InsightError::NoFallbackAvailable(format!("template '{}' rejected: {}", generated.template, e))
        })?;

        Ok(SmartQueryResult {
            sql_query: sql,
            chart_type: self.classifier.classify(question),
            response_message: format!(
                "I've generated an analysis for your question: \"{}\". The results should help provide the insights you're looking for.",
                question
            ),
            insights: self.cap(vec![
                "Fallback query generated".to_string(),
                format!("Question analyzed: {}", question),
                "Available data sources used".to_string(),
            ]),
            source: QuerySource::Fallback,
            trace: Vec::new(),
        })
    }

    fn cap(&self, mut insights: Vec<String>) -> Vec<String> {
        insights.truncate(self.config.max_insights);
        insights
    }
}

fn enter(trace: &mut Vec<PipelineState>, state: PipelineState) {
    debug!("Pipeline state -> {}", state);
    trace.push(state);
}

fn table_list(schemas: &[TableSchema]) -> String {
    schemas.iter().map(|s| s.name()).join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDescriptor;
    use async_trait::async_trait;

    struct Reply(&'static str);

    #[async_trait]
    impl LanguageModel for Reply {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl LanguageModel for Unavailable {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(InsightError::ModelUnavailable("connection refused".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl LanguageModel for Slow {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn orchestrator(model: Arc<dyn LanguageModel>) -> QueryOrchestrator {
        let config = Arc::new(PipelineConfig::default());
        let validator = Arc::new(SqlValidator::new(&config).unwrap());
        QueryOrchestrator::new(config, validator, model, Duration::from_millis(50))
    }

    fn schemas(names: &[&str]) -> Vec<TableSchema> {
        names
            .iter()
            .map(|n| TableSchema::new(*n, vec![ColumnDescriptor::new("id", "integer", false)], vec![], vec![], 0))
            .collect()
    }

    #[tokio::test]
    async fn test_model_success_trace() {
        let o = orchestrator(Arc::new(Reply(r#"{"sqlQuery": "SELECT id FROM orders", "chartType": "pie"}"#)));
        let result = o.run("orders", &schemas(&["orders"])).await.unwrap();
        assert_eq!(result.source, QuerySource::Model);
        assert_eq!(result.chart_type, ChartType::Pie);
        assert_eq!(result.response_message, "Here's the analysis for your question: \"orders\"");
        assert_eq!(result.insights, vec!["Analysis completed for: orders", "Tables analyzed: orders"]);
        assert_eq!(
            result.trace,
            vec![
                PipelineState::BuildingPrompt,
                PipelineState::AwaitingModel,
                PipelineState::Parsing,
                PipelineState::Validating,
                PipelineState::Succeeded,
                PipelineState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_chart_type_uses_classifier_and_insights_are_capped() {
        let o = orchestrator(Arc::new(Reply(
            r#"{"sqlQuery": "SELECT 1", "chartType": "scatter", "responseMessage": "ok", "insights": ["1","2","3","4","5","6"]}"#,
        )));
        let result = o.run("monthly growth", &schemas(&["orders"])).await.unwrap();
        assert_eq!(result.chart_type, ChartType::Line);
        assert_eq!(result.insights.len(), 4);
        assert_eq!(result.response_message, "ok");
    }

    #[tokio::test]
    async fn test_salvaged_sql_gets_synthesized_message() {
        let o = orchestrator(Arc::new(Reply("Try this:\nSELECT id FROM users")));
        let result = o.run("list users", &schemas(&["users"])).await.unwrap();
        assert_eq!(result.source, QuerySource::Model);
        assert_eq!(result.sql_query, "SELECT id FROM users");
        assert!(result.response_message.starts_with("I've analyzed your question \"list users\""));
        assert_eq!(result.insights[1], "Using available tables: users");
    }

    #[tokio::test]
    async fn test_model_unavailable_falls_back() {
        let o = orchestrator(Arc::new(Unavailable));
        let result = o.run("show me recent orders", &schemas(&["orders"])).await.unwrap();
        assert_eq!(result.source, QuerySource::Fallback);
        assert_eq!(result.chart_type, ChartType::Table);
        assert_eq!(result.insights[0], "Fallback query generated");
        assert_eq!(
            result.trace,
            vec![PipelineState::BuildingPrompt, PipelineState::AwaitingModel, PipelineState::FallingBack, PipelineState::Done]
        );
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let o = orchestrator(Arc::new(Slow));
        let result = o.run("top customers", &schemas(&["users", "orders"])).await.unwrap();
        assert_eq!(result.source, QuerySource::Fallback);
        assert!(result.sql_query.contains("FROM users u"));
    }

    #[tokio::test]
    async fn test_forbidden_sql_falls_back() {
        let o = orchestrator(Arc::new(Reply(r#"{"sqlQuery": "SELECT 1; DROP TABLE orders"}"#)));
        let result = o.run("orders please", &schemas(&["orders"])).await.unwrap();
        assert_eq!(result.source, QuerySource::Fallback);
        assert!(!result.sql_query.to_lowercase().contains("drop"));
        assert!(result.trace.contains(&PipelineState::Validating));
    }

    #[tokio::test]
    async fn test_missing_sql_falls_back() {
        let o = orchestrator(Arc::new(Reply(r#"{"chartType": "bar"}"#)));
        let result = o.run("orders", &schemas(&["orders"])).await.unwrap();
        assert_eq!(result.source, QuerySource::Fallback);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_terminal() {
        let o = orchestrator(Arc::new(Unavailable));
        let err = o.run("revenue", &[]).await.unwrap_err();
        assert!(matches!(err, InsightError::NoFallbackAvailable(_)));
    }
}
