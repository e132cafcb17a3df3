//! ETL configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Database (first match wins)
//! - `ETL_DATABASE_URL` - `PostgreSQL` connection string
//! - `DATABASE_URL` - Generic fallback
//! - `POSTGRES_HOST` / `POSTGRES_PORT` / `POSTGRES_DB` / `POSTGRES_USER` /
//!   `POSTGRES_PASSWORD` - Composed into a URL (defaults: `postgres`, `5432`,
//!   `axonedata`, `postgres`, `postgres`)
//!
//! ## Source
//! - `SOURCE_BASE_URL` - Catalog API root (default: `https://dummyjson.com`)
//! - `SOURCE_PAGE_SIZE` - Records per page request (default: 100)
//! - `SOURCE_MAX_RECORDS` - Optional per-collection cap, for test runs
//! - `SOURCE_TIMEOUT_SECS` - Per-request timeout (default: 30)
//!
//! ## Retry
//! - `RETRY_MAX_ATTEMPTS` - Attempts per page or write, including the first (default: 4)
//! - `RETRY_INITIAL_DELAY_MS` - First backoff delay (default: 500)
//! - `RETRY_MAX_DELAY_MS` - Backoff ceiling (default: 8000)

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::pipeline::RunOptions;
use crate::retry::RetryConfig;

const DEFAULT_SOURCE_BASE_URL: &str = "https://dummyjson.com";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Full ETL configuration.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Source catalog settings
    pub source: SourceConfig,
    /// Backoff applied to page fetches and store writes
    pub retry: RetryConfig,
    /// Default run options; CLI flags override these
    pub run: RunOptions,
}

/// Source catalog API settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl EtlConfig {
    /// Load configuration from the process environment.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = resolve_database_url(&lookup, "ETL_DATABASE_URL")?;

        let base_url = lookup("SOURCE_BASE_URL")
            .unwrap_or_else(|| DEFAULT_SOURCE_BASE_URL.to_owned());
        let base_url = Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("SOURCE_BASE_URL".to_owned(), e.to_string()))?;
        let timeout = Duration::from_secs(parse_or(&lookup, "SOURCE_TIMEOUT_SECS", 30_u64)?);

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: parse_or(&lookup, "RETRY_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "RETRY_INITIAL_DELAY_MS",
                500_u64,
            )?),
            max_delay: Duration::from_millis(parse_or(&lookup, "RETRY_MAX_DELAY_MS", 8000_u64)?),
            ..defaults
        };

        let run = RunOptions {
            page_size: parse_or(&lookup, "SOURCE_PAGE_SIZE", RunOptions::DEFAULT_PAGE_SIZE)?,
            max_records: parse_optional(&lookup, "SOURCE_MAX_RECORDS")?,
        };
        if run.page_size == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "SOURCE_PAGE_SIZE".to_owned(),
                "must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            source: SourceConfig { base_url, timeout },
            retry,
            run,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Resolve the database URL from `primary_key`, then `DATABASE_URL`, then the
/// `POSTGRES_*` component variables.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` if the composed URL is invalid.
pub fn resolve_database_url(
    lookup: &impl Fn(&str) -> Option<String>,
    primary_key: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(value) = lookup(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Some(value) = lookup("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }

    let host = lookup("POSTGRES_HOST").unwrap_or_else(|| "postgres".to_owned());
    let port: u16 = parse_or(lookup, "POSTGRES_PORT", 5432)?;
    let database = lookup("POSTGRES_DB").unwrap_or_else(|| "axonedata".to_owned());
    let user = lookup("POSTGRES_USER").unwrap_or_else(|| "postgres".to_owned());
    let password = lookup("POSTGRES_PASSWORD").unwrap_or_else(|| "postgres".to_owned());

    let invalid = |reason: String| ConfigError::InvalidEnvVar("POSTGRES_HOST".to_owned(), reason);
    let mut url = Url::parse("postgres://localhost").map_err(|e| invalid(e.to_string()))?;
    url.set_host(Some(&host)).map_err(|e| invalid(e.to_string()))?;
    url.set_port(Some(port))
        .map_err(|()| invalid("cannot carry a port".to_owned()))?;
    url.set_username(&user)
        .map_err(|()| invalid("cannot carry a username".to_owned()))?;
    url.set_password(Some(&password))
        .map_err(|()| invalid("cannot carry a password".to_owned()))?;
    url.set_path(&format!("/{database}"));

    Ok(SecretString::from(url.to_string()))
}

/// Parse a variable, falling back to `default` when it is unset.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` if the value does not parse.
pub fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(lookup, key)?.unwrap_or(default))
}

/// Parse a variable that may be unset.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` if the value does not parse.
pub fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string()))
        })
        .transpose()
}
