//! PostgreSQL collaborators: connection pool, schema introspection and
//! read-only query execution.

pub mod connection;
pub mod executor;
pub mod schema_source;

pub use connection::{init_pool, DbPool};
pub use executor::PgQueryExecutor;
pub use schema_source::PgSchemaSource;
