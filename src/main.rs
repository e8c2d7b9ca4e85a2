use insight_sql::config::{AppConfig, PipelineConfig};
use insight_sql::db::{init_pool, PgSchemaSource};
use insight_sql::prompt::PromptBuilder;
use insight_sql::schema::{fetch_schemas, SchemaSource, TableSummary};
use insight_sql::service::{ErrorResponse, QueryResponse, QueryService};
use insight_sql::sql_validator::SqlValidator;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight-sql")]
#[command(about = "Ask business questions of a PostgreSQL database in plain English")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, validate and run a query for a question
    Ask {
        /// The question in natural language
        question: String,

        /// Restrict the query to these tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Print the result rows as CSV instead of the JSON response
        #[arg(long)]
        csv: bool,
    },
    /// Print the prompt that would be sent to the model
    Prompt {
        question: String,

        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
    /// Check a SQL statement against the safety rules
    Validate {
        sql: String,
    },
    /// List tables with their columns and row counts
    Tables,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("insight_sql=info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    match args.command {
        Commands::Ask { question, tables, csv } => {
            let service = QueryService::from_config(&config).await?;
            let outcome = if tables.is_empty() {
                service.smart_query(&question).await
            } else {
                service.query(&question, &tables).await
            };
            match outcome {
                Ok(response) if csv => write_csv(&response)?,
                Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&ErrorResponse::from_error(&e))?);
                    bail!(e);
                }
            }
        }
        Commands::Prompt { question, tables } => {
            let source = connect_source(&config).await?;
            let tables = if tables.is_empty() { source.list_tables().await? } else { tables };
            let schemas = fetch_schemas(source, &tables, config.schema_fetch_concurrency).await;
            info!("Described {} of {} tables", schemas.len(), tables.len());
            let pipeline = PipelineConfig::default();
            println!("{}", PromptBuilder::new(&pipeline).build(&question, &schemas));
        }
        Commands::Validate { sql } => {
            let validator = SqlValidator::new(&PipelineConfig::default())?;
            match validator.validate(&sql) {
                Ok(normalized) => println!("OK: {}", normalized),
                Err(e) => bail!("Rejected: {}", e),
            }
        }
        Commands::Tables => {
            let source = connect_source(&config).await?;
            let names = source.list_tables().await?;
            let schemas = fetch_schemas(source, &names, config.schema_fetch_concurrency).await;
            let summaries: Vec<TableSummary> = schemas.iter().map(TableSummary::from).collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}

async fn connect_source(config: &AppConfig) -> Result<Arc<dyn SchemaSource>> {
    let pool = init_pool(config.require_database_url()?, config.schema_fetch_concurrency as u32)
        .await
        .context("failed to connect to database")?;
    Ok(Arc::new(PgSchemaSource::new(pool, config.schema_namespace.clone())))
}

fn write_csv(response: &QueryResponse) -> Result<()> {
    // Rows from json_agg share one shape; columns keep the SELECT-list order.
    let headers: Vec<String> = response
        .results
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();

    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(&headers)?;
    for row in &response.results {
        let record: Vec<String> = headers
            .iter()
            .map(|h| match row.get(h) {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
