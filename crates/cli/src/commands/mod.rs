//! Subcommand implementations.

pub mod migrate;
pub mod run;
pub mod top;

use std::sync::Arc;

use thiserror::Error;

use cart_insights_core::PipelineState;
use cart_insights_etl::{ConfigError, EtlConfig, FetchError, PgStore, StoreError, db};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source client error: {0}")]
    Source(#[from] FetchError),

    #[error("Could not encode output: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline run ended in a state other than `Completed`.
    #[error("Pipeline run {state}: {message}")]
    RunFailed {
        state: PipelineState,
        message: String,
    },
}

/// Connect to the store named by the ETL configuration.
async fn connect(config: &EtlConfig) -> Result<Arc<PgStore>, CommandError> {
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    Ok(Arc::new(PgStore::new(pool)))
}
