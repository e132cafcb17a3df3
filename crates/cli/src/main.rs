//! Cart Insights CLI - pipeline runs, rankings and schema management.
//!
//! # Usage
//!
//! ```bash
//! # Sync users and carts from the source API into PostgreSQL
//! ci-cli run
//!
//! # Try a run without a database
//! ci-cli run --dry-run --max-records 30
//!
//! # Sync on an interval
//! ci-cli run --every 900
//!
//! # Show rankings
//! ci-cli top spenders --limit 5
//! ci-cli top sellers
//!
//! # Create tables ahead of the first run
//! ci-cli migrate
//! ```
//!
//! # Commands
//!
//! - `run` - Execute the ETL pipeline
//! - `top` - Print top spenders or top sellers
//! - `migrate` - Create the schema if missing

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "ci-cli")]
#[command(author, version, about = "Cart Insights CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ETL pipeline
    Run {
        /// Records requested per page (overrides `SOURCE_PAGE_SIZE`)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page_size: Option<u32>,

        /// Stop each collection after this many records
        #[arg(long)]
        max_records: Option<usize>,

        /// Load into an in-memory store instead of `PostgreSQL`
        #[arg(long)]
        dry_run: bool,

        /// Repeat every N seconds until Ctrl+C
        #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
        every: Option<u64>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print rankings from the store
    Top {
        #[command(subcommand)]
        ranking: Ranking,

        /// Number of rows (1-100)
        #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=100), global = true)]
        limit: u32,

        /// Print JSON instead of a table
        #[arg(long, global = true)]
        json: bool,
    },
    /// Create tables and indexes if missing
    Migrate,
}

#[derive(Subcommand)]
enum Ranking {
    /// Users by total spend
    Spenders,
    /// Products by quantity sold
    Sellers,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Logs go to stderr so `--json` output stays machine-readable
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cart_insights_cli=info,cart_insights_etl=info".into());
    let is_json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let json_layer = is_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!is_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            page_size,
            max_records,
            dry_run,
            every,
            json,
        } => {
            commands::run::execute(RunArgs {
                page_size,
                max_records,
                dry_run,
                every,
                json,
            })
            .await?;
        }
        Commands::Top {
            ranking,
            limit,
            json,
        } => match ranking {
            Ranking::Spenders => commands::top::spenders(limit, json).await?,
            Ranking::Sellers => commands::top::sellers(limit, json).await?,
        },
        Commands::Migrate => commands::migrate::schema().await?,
    }
    Ok(())
}
