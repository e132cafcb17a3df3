//! Cart Insights Core - Shared types library.
//!
//! This crate provides common types used across all Cart Insights components:
//! - `etl` - Extraction, normalization and loading of users and carts
//! - `api` - Read API serving the spender and seller rankings
//! - `cli` - Command-line tools for triggering pipeline runs
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, catalog entities, rankings and pipeline states

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
