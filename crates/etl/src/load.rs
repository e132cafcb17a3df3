//! Idempotent loader.
//!
//! Persists normalized entities in parent-before-child order. Each call is a
//! single store transaction; a dropped connection is retried with backoff,
//! every other failure surfaces immediately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{instrument, warn};

use cart_insights_core::{Cart, CartId, CartItem, User};

use crate::db::{CatalogWriter, StoreError};
use crate::retry::{RetryConfig, RetryPolicy};

/// Errors surfaced by the loader.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The store stayed unreachable through every retry.
    #[error("store unreachable after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// A child row referenced a parent that is not in the store.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// The caller passed rows that do not belong together.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Any other store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LoadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ForeignKeyViolation(msg) => Self::ForeignKeyViolation(msg),
            other => Self::Store(other),
        }
    }
}

/// Writes entities to a [`CatalogWriter`].
#[derive(Clone)]
pub struct Loader {
    writer: Arc<dyn CatalogWriter>,
    retry: RetryConfig,
}

impl Loader {
    /// Create a loader over `writer`.
    #[must_use]
    pub fn new(writer: Arc<dyn CatalogWriter>, retry: RetryConfig) -> Self {
        Self { writer, retry }
    }

    /// Create tables and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the DDL cannot be applied.
    pub async fn ensure_schema(&self) -> Result<(), LoadError> {
        self.with_retry("ensure_schema", || self.writer.ensure_schema())
            .await
    }

    /// Upsert a single user.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the write fails.
    pub async fn upsert_user(&self, user: &User) -> Result<(), LoadError> {
        self.upsert_users(std::slice::from_ref(user)).await
    }

    /// Upsert a batch of users atomically. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the write fails; no user of the batch is
    /// persisted in that case.
    #[instrument(skip(self, users), fields(count = users.len()))]
    pub async fn upsert_users(&self, users: &[User]) -> Result<(), LoadError> {
        if users.is_empty() {
            return Ok(());
        }
        self.with_retry("upsert_users", || self.writer.upsert_users(users))
            .await
    }

    /// Upsert a cart. Its owner must already be loaded.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::ForeignKeyViolation` if the owner is missing.
    #[instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn upsert_cart(&self, cart: &Cart) -> Result<(), LoadError> {
        self.with_retry("upsert_cart", || self.writer.upsert_cart(cart))
            .await
    }

    /// Upsert cart lines. Every cart touched by `items` ends up with exactly
    /// the lines given for it; carts are written in order of first
    /// appearance.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::ForeignKeyViolation` if a referenced cart is
    /// missing. Carts written before the failure stay committed.
    pub async fn upsert_cart_items(&self, items: &[CartItem]) -> Result<(), LoadError> {
        let mut slots: HashMap<CartId, usize> = HashMap::new();
        let mut groups: Vec<(CartId, Vec<CartItem>)> = Vec::new();
        for item in items {
            let slot = *slots.entry(item.cart_id).or_insert_with(|| {
                groups.push((item.cart_id, Vec::new()));
                groups.len() - 1
            });
            if let Some((_, lines)) = groups.get_mut(slot) {
                lines.push(item.clone());
            }
        }

        for (cart_id, lines) in &groups {
            self.replace_cart_items(*cart_id, lines).await?;
        }
        Ok(())
    }

    /// Make `items` the full line set of `cart_id`. An empty slice clears
    /// the cart.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidBatch` if an item names a different cart,
    /// and `LoadError::ForeignKeyViolation` if the cart is missing.
    #[instrument(skip(self, items), fields(cart_id = %cart_id, count = items.len()))]
    pub async fn replace_cart_items(
        &self,
        cart_id: CartId,
        items: &[CartItem],
    ) -> Result<(), LoadError> {
        if let Some(stray) = items.iter().find(|item| item.cart_id != cart_id) {
            return Err(LoadError::InvalidBatch(format!(
                "line for product {} belongs to cart {}, not {cart_id}",
                stray.product.id, stray.cart_id
            )));
        }
        self.with_retry("replace_cart_items", || {
            self.writer.replace_cart_items(cart_id, items)
        })
        .await
    }

    async fn with_retry<F, Fut>(&self, operation: &str, mut call: F) -> Result<(), LoadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let mut policy = RetryPolicy::new(self.retry.clone());

        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_connection() => {
                    let Some(delay) = policy.next_delay() else {
                        return Err(LoadError::Connection {
                            attempts: policy.attempts(),
                            source: err,
                        });
                    };
                    warn!(
                        operation,
                        attempt = policy.attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Store unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
