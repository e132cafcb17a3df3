//! In-memory catalog store.
//!
//! Mirrors the relational constraints of [`super::PgStore`] (primary keys,
//! foreign keys, replace semantics for cart lines) so the pipeline and the API
//! can be exercised without a database. Also backs `ci-cli run --dry-run`.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use cart_insights_core::{
    Cart, CartId, CartItem, ProductId, TopSeller, TopSpender, User, UserId,
};

use super::{CatalogReader, CatalogWriter, StoreError};

/// Key range covering every line of one cart.
const fn lines_of(cart_id: CartId) -> RangeInclusive<(CartId, ProductId)> {
    (cart_id, ProductId::new(i32::MIN))..=(cart_id, ProductId::new(i32::MAX))
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    carts: BTreeMap<CartId, Cart>,
    items: BTreeMap<(CartId, ProductId), CartItem>,
}

/// Catalog store held in process memory.
///
/// Cheap to clone; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
    failing_writes: Arc<AtomicU32>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a connection error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` writes with a connection error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// All users, ordered by id.
    pub async fn users(&self) -> Vec<User> {
        self.tables.read().await.users.values().cloned().collect()
    }

    /// All carts, ordered by id.
    pub async fn carts(&self) -> Vec<Cart> {
        self.tables.read().await.carts.values().cloned().collect()
    }

    /// Lines of one cart, ordered by product id.
    pub async fn cart_items(&self, cart_id: CartId) -> Vec<CartItem> {
        self.tables
            .read()
            .await
            .items
            .range(lines_of(cart_id))
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// Row counts as `(users, carts, cart_items)`.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let tables = self.tables.read().await;
        (tables.users.len(), tables.carts.len(), tables.items.len())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        self.check_available()?;
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::Connection(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogWriter for InMemoryStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn upsert_users(&self, users: &[User]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        for user in users {
            tables.users.insert(user.id, user.clone());
        }
        Ok(())
    }

    async fn upsert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&cart.user_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "cart {} references missing user {}",
                cart.id, cart.user_id
            )));
        }
        tables.carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn replace_cart_items(
        &self,
        cart_id: CartId,
        items: &[CartItem],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if !tables.carts.contains_key(&cart_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "cart {cart_id} does not exist"
            )));
        }

        let stale: Vec<(CartId, ProductId)> =
            tables.items.range(lines_of(cart_id)).map(|(key, _)| *key).collect();
        for key in stale {
            tables.items.remove(&key);
        }
        for item in items {
            let mut item = item.clone();
            item.cart_id = cart_id;
            tables.items.insert((cart_id, item.product.id), item);
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogReader for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn top_spenders(&self, limit: u32) -> Result<Vec<TopSpender>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().await;

        let mut totals: BTreeMap<UserId, Decimal> = BTreeMap::new();
        for cart in tables.carts.values() {
            *totals.entry(cart.user_id).or_default() += cart.discounted_total;
        }

        let mut ranked: Vec<TopSpender> = totals
            .into_iter()
            .filter_map(|(user_id, total_spend)| {
                tables.users.get(&user_id).map(|user| TopSpender {
                    user_id,
                    name: user.full_name(),
                    total_spend,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.total_spend
                .cmp(&a.total_spend)
                .then(a.user_id.cmp(&b.user_id))
        });
        ranked.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(ranked)
    }

    async fn top_sellers(&self, limit: u32) -> Result<Vec<TopSeller>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().await;

        // (quantity, highest cart id seen, title from that cart)
        let mut totals: HashMap<ProductId, (u64, CartId, &str)> = HashMap::new();
        for ((cart_id, product_id), item) in &tables.items {
            let entry = totals
                .entry(*product_id)
                .or_insert((0, *cart_id, item.product.title.as_str()));
            entry.0 += u64::from(item.quantity);
            if *cart_id >= entry.1 {
                entry.1 = *cart_id;
                entry.2 = item.product.title.as_str();
            }
        }

        let mut ranked: Vec<TopSeller> = totals
            .into_iter()
            .map(|(product_id, (total_quantity_sold, _, title))| TopSeller {
                product_id,
                name: title.to_owned(),
                total_quantity_sold,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.total_quantity_sold
                .cmp(&a.total_quantity_sold)
                .then(a.product_id.cmp(&b.product_id))
        });
        ranked.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(ranked)
    }
}
