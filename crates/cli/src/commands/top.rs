//! Ranking commands.
//!
//! # Usage
//!
//! ```bash
//! ci-cli top spenders --limit 5
//! ci-cli top sellers --json
//! ```

use cart_insights_core::{TopSeller, TopSpender};
use cart_insights_etl::{Aggregator, EtlConfig};

use super::{CommandError, connect};

/// Print the top `limit` spenders from the configured store.
///
/// # Errors
///
/// Returns `CommandError` if the store cannot be reached or queried.
#[allow(clippy::print_stdout)]
pub async fn spenders(limit: u32, json: bool) -> Result<(), CommandError> {
    let aggregator = aggregator().await?;
    let ranked = aggregator.top_spenders(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
    } else {
        print_spenders(&ranked);
    }
    Ok(())
}

/// Print the top `limit` sellers from the configured store.
///
/// # Errors
///
/// Returns `CommandError` if the store cannot be reached or queried.
#[allow(clippy::print_stdout)]
pub async fn sellers(limit: u32, json: bool) -> Result<(), CommandError> {
    let aggregator = aggregator().await?;
    let ranked = aggregator.top_sellers(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
    } else {
        print_sellers(&ranked);
    }
    Ok(())
}

async fn aggregator() -> Result<Aggregator, CommandError> {
    let config = EtlConfig::from_env()?;
    Ok(Aggregator::new(connect(&config).await?))
}

#[allow(clippy::print_stdout)]
pub(crate) fn print_spenders(ranked: &[TopSpender]) {
    println!("{:>4}  {:>8}  {:<30}  {:>12}", "#", "user", "name", "spend");
    for (rank, row) in ranked.iter().enumerate() {
        println!(
            "{:>4}  {:>8}  {:<30}  {:>12}",
            rank + 1,
            row.user_id.as_i32(),
            row.name,
            row.total_spend.to_string()
        );
    }
}

#[allow(clippy::print_stdout)]
pub(crate) fn print_sellers(ranked: &[TopSeller]) {
    println!("{:>4}  {:>8}  {:<40}  {:>8}", "#", "product", "name", "sold");
    for (rank, row) in ranked.iter().enumerate() {
        println!(
            "{:>4}  {:>8}  {:<40}  {:>8}",
            rank + 1,
            row.product_id.as_i32(),
            row.name,
            row.total_quantity_sold
        );
    }
}
