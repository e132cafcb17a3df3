//! Relational store for users, carts and cart lines.
//!
//! # Tables
//!
//! - `users` - One row per catalog user
//! - `carts` - One row per cart, `user_id` references `users`
//! - `cart_items` - One row per (cart, product) line, `cart_id` references `carts`
//!
//! The schema is created idempotently by [`CatalogWriter::ensure_schema`].
//!
//! Both halves of the store sit behind traits so the pipeline, the API and
//! the tests can run against [`PgStore`] or [`InMemoryStore`] alike.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use cart_insights_core::{Cart, CartId, CartItem, TopSeller, TopSpender, User};

/// SQLSTATE for `foreign_key_violation`.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached. Safe to retry.
    #[error("store unavailable: {0}")]
    Connection(#[source] sqlx::Error),

    /// A row references a parent that does not exist.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Any other database error from sqlx.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Data in the store is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl StoreError {
    /// Whether the failure is a lost or unobtainable connection.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => Self::Connection(err),
            sqlx::Error::Database(db)
                if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
            {
                Self::ForeignKeyViolation(db.message().to_owned())
            }
            _ => Self::Database(err),
        }
    }
}

/// Write side of the store, used by the loader.
///
/// Every write is an upsert keyed by source id, so replaying a run
/// converges on the same rows.
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    /// Create tables and indexes if they do not exist.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Upsert a batch of users in one transaction.
    async fn upsert_users(&self, users: &[User]) -> Result<(), StoreError>;

    /// Upsert one cart. Fails with `ForeignKeyViolation` if its user is absent.
    async fn upsert_cart(&self, cart: &Cart) -> Result<(), StoreError>;

    /// Make `items` the complete set of lines for `cart_id`, in one
    /// transaction. Lines no longer present are removed.
    async fn replace_cart_items(&self, cart_id: CartId, items: &[CartItem])
    -> Result<(), StoreError>;
}

/// Read side of the store, used by the aggregator.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Check that the store answers.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Users ranked by summed cart `discounted_total`, highest first, ties by
    /// ascending user id. Users without carts are excluded.
    async fn top_spenders(&self, limit: u32) -> Result<Vec<TopSpender>, StoreError>;

    /// Products ranked by summed line quantity, highest first, ties by
    /// ascending product id.
    async fn top_sellers(&self, limit: u32) -> Result<Vec<TopSeller>, StoreError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Build a pool without connecting. The first query establishes the
/// connection, so a server can start while the database is still down.
///
/// # Errors
///
/// Returns `sqlx::Error` if the URL cannot be parsed.
pub fn create_lazy_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(database_url.expose_secret())
}
