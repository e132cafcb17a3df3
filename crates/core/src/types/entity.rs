//! Normalized catalog entities.
//!
//! These are the strongly typed rows the pipeline persists. They are only
//! ever built by the ETL transformer from validated source records, so every
//! value here already satisfies the schema constraints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::id::{CartId, ProductId, UserId};

/// A customer of the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: Option<String>,
    pub age: Option<u32>,
}

impl User {
    /// Display name used by the rankings (`"First Last"`).
    #[must_use]
    pub fn full_name(&self) -> String {
        display_name(&self.first_name, &self.last_name)
    }
}

/// Join first and last name, skipping empty parts.
#[must_use]
pub fn display_name(first: &str, last: &str) -> String {
    match (first.trim(), last.trim()) {
        ("", last) => last.to_owned(),
        (first, "") => first.to_owned(),
        (first, last) => format!("{first} {last}"),
    }
}

/// A shopping cart owned by exactly one [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    /// Sum of line totals before discounts.
    pub total: Decimal,
    /// Amount actually charged; this is what spender rankings sum.
    pub discounted_total: Decimal,
    pub total_products: u32,
    pub total_quantity: u32,
}

/// Snapshot of a product as it appeared in a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: ProductId,
    pub title: String,
    /// Unit price at time of sale.
    pub price: Decimal,
}

/// One product line of a [`Cart`]. Keyed by `(cart_id, product.id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub cart_id: CartId,
    pub product: ProductRef,
    pub quantity: u32,
    pub total: Decimal,
    pub discount_percentage: Decimal,
    pub discounted_total: Decimal,
}
