//! Schema bootstrap command.
//!
//! # Usage
//!
//! ```bash
//! ci-cli migrate
//! ```
//!
//! Creates `users`, `carts` and `cart_items` with their indexes if they do
//! not exist. `ci-cli run` does the same before every run, so this is only
//! needed to prepare a database ahead of the first sync.
//!
//! # Environment Variables
//!
//! - `ETL_DATABASE_URL` / `DATABASE_URL` / `POSTGRES_*` - see `EtlConfig`

use cart_insights_etl::{CatalogWriter, EtlConfig};

use super::{CommandError, connect};

/// Apply the schema.
///
/// # Errors
///
/// Returns `CommandError` if the database is unreachable or the DDL fails.
pub async fn schema() -> Result<(), CommandError> {
    let config = EtlConfig::from_env()?;
    let store = connect(&config).await?;

    tracing::info!("Applying schema...");
    store.ensure_schema().await?;
    tracing::info!("Schema is up to date");
    Ok(())
}
