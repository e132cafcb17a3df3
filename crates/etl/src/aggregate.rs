//! Read-side rankings over the loaded catalog.

use std::sync::Arc;

use tracing::instrument;

use cart_insights_core::{TopSeller, TopSpender};

use crate::db::{CatalogReader, StoreError};

/// Computes top spender and top seller rankings from a [`CatalogReader`].
///
/// Stateless apart from the reader handle; cheap to clone and share between
/// request handlers.
#[derive(Clone)]
pub struct Aggregator {
    reader: Arc<dyn CatalogReader>,
}

impl Aggregator {
    /// Create an aggregator over `reader`.
    #[must_use]
    pub fn new(reader: Arc<dyn CatalogReader>) -> Self {
        Self { reader }
    }

    /// Up to `n` users by total spend, highest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be queried.
    #[instrument(skip(self))]
    pub async fn top_spenders(&self, n: u32) -> Result<Vec<TopSpender>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut ranked = self.reader.top_spenders(n).await?;
        ranked.truncate(n as usize);
        Ok(ranked)
    }

    /// Up to `n` products by quantity sold, highest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be queried.
    #[instrument(skip(self))]
    pub async fn top_sellers(&self, n: u32) -> Result<Vec<TopSeller>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut ranked = self.reader.top_sellers(n).await?;
        ranked.truncate(n as usize);
        Ok(ranked)
    }

    /// Check that the underlying store answers.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if it does not.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.reader.ping().await
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cart_insights_core::{Cart, CartId, Email, User, UserId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::{CatalogWriter, InMemoryStore};

    async fn seeded() -> (InMemoryStore, Aggregator) {
        let store = InMemoryStore::new();
        let users: Vec<User> = (1..=3)
            .map(|id| User {
                id: UserId::new(id),
                first_name: format!("First{id}"),
                last_name: format!("Last{id}"),
                email: Email::parse(&format!("u{id}@example.com")).unwrap(),
                phone: None,
                age: None,
            })
            .collect();
        store.upsert_users(&users).await.unwrap();
        for (cart, user, cents) in [(1, 1, 1000), (2, 2, 3000), (3, 3, 2000)] {
            store
                .upsert_cart(&Cart {
                    id: CartId::new(cart),
                    user_id: UserId::new(user),
                    total: Decimal::new(cents, 2),
                    discounted_total: Decimal::new(cents, 2),
                    total_products: 0,
                    total_quantity: 0,
                })
                .await
                .unwrap();
        }
        let aggregator = Aggregator::new(Arc::new(store.clone()));
        (store, aggregator)
    }

    #[tokio::test]
    async fn test_top_spenders_sorted_and_limited() {
        let (_, aggregator) = seeded().await;
        let ranked = aggregator.top_spenders(2).await.unwrap();
        let ids: Vec<i32> = ranked.iter().map(|s| s.user_id.as_i32()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(ranked[0].name, "First2 Last2");
    }

    #[tokio::test]
    async fn test_zero_returns_empty_without_query() {
        let (store, aggregator) = seeded().await;
        store.set_unavailable(true);
        assert!(aggregator.top_spenders(0).await.unwrap().is_empty());
        assert!(aggregator.top_sellers(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_larger_than_data() {
        let (_, aggregator) = seeded().await;
        assert_eq!(aggregator.top_spenders(50).await.unwrap().len(), 3);
        assert!(aggregator.top_sellers(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let (store, aggregator) = seeded().await;
        store.set_unavailable(true);
        assert!(aggregator.top_spenders(5).await.unwrap_err().is_connection());
        assert!(aggregator.ping().await.is_err());
    }
}
