//! Core types for Cart Insights.
//!
//! This module provides type-safe wrappers for the catalog domain.

pub mod email;
pub mod entity;
pub mod id;
pub mod ranking;
pub mod status;

pub use email::{Email, EmailError};
pub use entity::{Cart, CartItem, ProductRef, User, display_name};
pub use id::*;
pub use ranking::{TopSeller, TopSpender};
pub use status::*;
