//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Database (first match wins)
//! - `API_DATABASE_URL` - `PostgreSQL` connection string
//! - `DATABASE_URL` - Generic fallback
//! - `POSTGRES_*` - Composed into a URL, same defaults as the ETL
//!
//! ## Optional
//! - `API_HOST` - Bind address (default: 127.0.0.1)
//! - `API_PORT` - Listen port (default: 8000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.0)

use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;

use cart_insights_etl::ConfigError;
use cart_insights_etl::config::{parse_optional, parse_or, resolve_database_url};

/// Query API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
    pub sentry_traces_sample_rate: f32,
}

impl ApiConfig {
    /// Load configuration from environment variables.
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
        let database_url = resolve_database_url(&lookup, "API_DATABASE_URL")?;
        let host: IpAddr = parse_or(&lookup, "API_HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port: u16 = parse_or(&lookup, "API_PORT", 8000)?;

        let sentry_sample_rate = parse_or(&lookup, "SENTRY_SAMPLE_RATE", 1.0_f32)?;
        let sentry_traces_sample_rate = parse_or(&lookup, "SENTRY_TRACES_SAMPLE_RATE", 0.0_f32)?;
        for (key, rate) in [
            ("SENTRY_SAMPLE_RATE", sentry_sample_rate),
            ("SENTRY_TRACES_SAMPLE_RATE", sentry_traces_sample_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::InvalidEnvVar(
                    key.to_owned(),
                    "must be between 0.0 and 1.0".to_owned(),
                ));
            }
        }

        Ok(Self {
            database_url,
            host,
            port,
            sentry_dsn: parse_optional(&lookup, "SENTRY_DSN")?.filter(|s: &String| !s.is_empty()),
            sentry_environment: lookup("SENTRY_ENVIRONMENT"),
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
