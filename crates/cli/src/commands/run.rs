//! Pipeline run command.
//!
//! # Usage
//!
//! ```bash
//! # One full sync into PostgreSQL
//! ci-cli run
//!
//! # Small sample against the in-memory store, report as JSON
//! ci-cli run --dry-run --max-records 20 --json
//!
//! # Sync every 15 minutes until Ctrl+C
//! ci-cli run --every 900
//! ```
//!
//! # Environment Variables
//!
//! All of `EtlConfig`; flags override `SOURCE_PAGE_SIZE` and
//! `SOURCE_MAX_RECORDS`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use cart_insights_etl::{
    Aggregator, CatalogWriter, EtlConfig, InMemoryStore, Loader, Pipeline, RunOptions, RunReport,
    SourceClient,
};

use super::{CommandError, connect};

/// Rows shown per ranking after a dry run.
const DRY_RUN_PREVIEW: u32 = 5;

/// Flags accepted by `ci-cli run`.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub page_size: Option<u32>,
    pub max_records: Option<usize>,
    pub dry_run: bool,
    pub every: Option<u64>,
    pub json: bool,
}

/// Execute one run, or one run per interval until interrupted.
///
/// # Errors
///
/// Returns `CommandError::RunFailed` if a single run does not complete, or
/// any setup error. In interval mode a failed run is reported and the loop
/// continues.
pub async fn execute(args: RunArgs) -> Result<(), CommandError> {
    let config = EtlConfig::from_env()?;
    let options = RunOptions {
        page_size: args.page_size.unwrap_or(config.run.page_size).max(1),
        max_records: args.max_records.or(config.run.max_records),
    };

    let source = SourceClient::new(&config.source, config.retry.clone())?;
    let memory = args.dry_run.then(InMemoryStore::new);
    let writer: Arc<dyn CatalogWriter> = match &memory {
        Some(store) => {
            tracing::info!("Dry run: loading into the in-memory store");
            Arc::new(store.clone())
        }
        None => connect(&config).await? as Arc<dyn CatalogWriter>,
    };
    let pipeline = Pipeline::new(source, Loader::new(writer, config.retry.clone()));

    let Some(every) = args.every else {
        let report = pipeline.run(&options).await;
        emit(&report, args.json)?;
        if let Some(store) = &memory {
            preview(store, args.json).await?;
        }
        return finish(report);
    };

    let mut interval = tokio::time::interval(Duration::from_secs(every.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = pipeline.run(&options).await;
                emit(&report, args.json)?;
            }
            _ = &mut shutdown => {
                tracing::info!("Interrupted, stopping scheduled runs");
                return Ok(());
            }
        }
    }
}

fn finish(report: RunReport) -> Result<(), CommandError> {
    if report.is_success() {
        return Ok(());
    }
    Err(CommandError::RunFailed {
        state: report.state,
        message: report.error.unwrap_or_default(),
    })
}

#[allow(clippy::print_stdout)]
fn emit(report: &RunReport, json: bool) -> Result<(), CommandError> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    let c = &report.counters;
    println!(
        "run {} {} in {}ms",
        report.run_id,
        report.state,
        report.duration().num_milliseconds()
    );
    println!("{:<8} {:>8} {:>12} {:>8} {:>8}", "", "fetched", "transformed", "skipped", "loaded");
    for (name, r) in [("users", &c.users), ("carts", &c.carts)] {
        println!(
            "{name:<8} {:>8} {:>12} {:>8} {:>8}",
            r.fetched, r.transformed, r.skipped, r.loaded
        );
    }
    println!("cart lines loaded: {}", c.cart_items_loaded);
    if let Some(error) = &report.error {
        println!("error: {error}");
    }
    Ok(())
}

/// Print the rankings a dry run produced, since nothing else can read them.
#[allow(clippy::print_stdout)]
async fn preview(store: &InMemoryStore, json: bool) -> Result<(), CommandError> {
    let aggregator = Aggregator::new(Arc::new(store.clone()));
    let spenders = aggregator.top_spenders(DRY_RUN_PREVIEW).await?;
    let sellers = aggregator.top_sellers(DRY_RUN_PREVIEW).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "topSpenders": spenders, "topSellers": sellers })
        );
        return Ok(());
    }

    super::top::print_spenders(&spenders);
    super::top::print_sellers(&sellers);
    Ok(())
}
