pub mod chart;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod fallback;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod response_parser;
pub mod schema;
pub mod service;
pub mod sql_validator;

pub use chart::{ChartType, ChartTypeClassifier};
pub use config::{AppConfig, PipelineConfig};
pub use error::{InsightError, Result, ValidationError};
pub use execution::{QueryExecutor, Row};
pub use fallback::{FallbackQuery, FallbackQueryGenerator};
pub use llm::{LanguageModel, LlmClient};
pub use orchestrator::{PipelineState, QueryOrchestrator, QuerySource, SmartQueryResult};
pub use prompt::PromptBuilder;
pub use response_parser::{ParsedResponse, ResponseParser};
pub use schema::{ColumnDescriptor, ForeignKeyDescriptor, SchemaDescriber, SchemaSource, TableSchema};
pub use service::{ErrorResponse, QueryResponse, QueryService};
pub use sql_validator::SqlValidator;
