//! Cart Insights ETL library.
//!
//! Pulls paginated users and carts from the source catalog, normalizes them
//! into typed entities and loads them idempotently into the relational store.
//! The same crate hosts the read-side aggregator used by the API and the CLI.
//!
//! # Modules
//!
//! - [`source`] - Paginated HTTP client with bounded retry
//! - [`transform`] - Parse-and-validate boundary from raw JSON to entities
//! - [`db`] - Store traits with `PostgreSQL` and in-memory implementations
//! - [`load`] - Transactional, order-preserving upserts
//! - [`aggregate`] - Top spender and top seller rankings
//! - [`pipeline`] - Run controller, run context and run report

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod aggregate;
pub mod config;
pub mod db;
pub mod load;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod transform;

pub use aggregate::Aggregator;
pub use config::{ConfigError, EtlConfig};
pub use db::{CatalogReader, CatalogWriter, InMemoryStore, PgStore, StoreError};
pub use load::{LoadError, Loader};
pub use pipeline::{
    Pipeline, PipelineError, ResourceCounters, RunContext, RunCounters, RunOptions, RunReport,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{FetchError, Page, RawRecord, SourceClient};
pub use transform::{MismatchReason, RecordKind, SchemaMismatchError};
