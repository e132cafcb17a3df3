//! `PostgreSQL` implementation of the catalog store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use cart_insights_core::{
    Cart, CartId, CartItem, ProductId, TopSeller, TopSpender, User, UserId, display_name,
};

use super::{CatalogReader, CatalogWriter, StoreError};

/// Idempotent DDL, applied in order.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        id          INTEGER PRIMARY KEY,
        first_name  TEXT NOT NULL,
        last_name   TEXT NOT NULL,
        email       TEXT NOT NULL,
        phone       TEXT,
        age         INTEGER CHECK (age >= 0),
        synced_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS carts (
        id                INTEGER PRIMARY KEY,
        user_id           INTEGER NOT NULL REFERENCES users (id),
        total             NUMERIC(14, 2) NOT NULL CHECK (total >= 0),
        discounted_total  NUMERIC(14, 2) NOT NULL CHECK (discounted_total >= 0),
        total_products    INTEGER NOT NULL CHECK (total_products >= 0),
        total_quantity    INTEGER NOT NULL CHECK (total_quantity >= 0),
        synced_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS cart_items (
        cart_id              INTEGER NOT NULL REFERENCES carts (id) ON DELETE CASCADE,
        product_id           INTEGER NOT NULL,
        title                TEXT NOT NULL,
        price                NUMERIC(14, 2) NOT NULL CHECK (price >= 0),
        quantity             INTEGER NOT NULL CHECK (quantity >= 0),
        total                NUMERIC(14, 2) NOT NULL CHECK (total >= 0),
        discount_percentage  NUMERIC(5, 2) NOT NULL CHECK (discount_percentage BETWEEN 0 AND 100),
        discounted_total     NUMERIC(14, 2) NOT NULL CHECK (discounted_total >= 0),
        synced_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (cart_id, product_id)
    )
    ",
    "CREATE INDEX IF NOT EXISTS carts_user_id_idx ON carts (user_id)",
    "CREATE INDEX IF NOT EXISTS cart_items_product_id_idx ON cart_items (product_id)",
];

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct TopSpenderRow {
    user_id: UserId,
    first_name: String,
    last_name: String,
    total_spend: Decimal,
}

impl From<TopSpenderRow> for TopSpender {
    fn from(row: TopSpenderRow) -> Self {
        Self {
            user_id: row.user_id,
            name: display_name(&row.first_name, &row.last_name),
            total_spend: row.total_spend,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TopSellerRow {
    product_id: ProductId,
    title: String,
    total_quantity_sold: i64,
}

impl TryFrom<TopSellerRow> for TopSeller {
    type Error = StoreError;

    fn try_from(row: TopSellerRow) -> Result<Self, Self::Error> {
        let total_quantity_sold = u64::try_from(row.total_quantity_sold).map_err(|_| {
            StoreError::DataCorruption(format!(
                "negative quantity sold for product {}",
                row.product_id
            ))
        })?;

        Ok(Self {
            product_id: row.product_id,
            name: row.title,
            total_quantity_sold,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Catalog store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn column_i32(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::DataCorruption(format!("{column} {value} exceeds INTEGER")))
}

#[async_trait]
impl CatalogWriter for PgStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_users(&self, users: &[User]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for user in users {
            let age = user.age.map(|age| column_i32(age, "age")).transpose()?;
            sqlx::query(
                r"
                INSERT INTO users (id, first_name, last_name, email, phone, age, synced_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    email = EXCLUDED.email,
                    phone = EXCLUDED.phone,
                    age = EXCLUDED.age,
                    synced_at = NOW()
                ",
            )
            .bind(user.id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.phone.as_deref())
            .bind(age)
            .execute(&mut *tx)
            .await?;
        }

        // Dropping the transaction without commit rolls back the whole batch.
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO carts (id, user_id, total, discounted_total, total_products,
                               total_quantity, synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                total = EXCLUDED.total,
                discounted_total = EXCLUDED.discounted_total,
                total_products = EXCLUDED.total_products,
                total_quantity = EXCLUDED.total_quantity,
                synced_at = NOW()
            ",
        )
        .bind(cart.id)
        .bind(cart.user_id)
        .bind(cart.total)
        .bind(cart.discounted_total)
        .bind(column_i32(cart.total_products, "total_products")?)
        .bind(column_i32(cart.total_quantity, "total_quantity")?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn replace_cart_items(
        &self,
        cart_id: CartId,
        items: &[CartItem],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<CartId> = sqlx::query_scalar("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
            .bind(cart_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::ForeignKeyViolation(format!(
                "cart {cart_id} does not exist"
            )));
        }

        let product_ids: Vec<i32> = items.iter().map(|i| i.product.id.as_i32()).collect();
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id <> ALL($2)")
            .bind(cart_id)
            .bind(&product_ids)
            .execute(&mut *tx)
            .await?;

        for item in items {
            sqlx::query(
                r"
                INSERT INTO cart_items (cart_id, product_id, title, price, quantity, total,
                                        discount_percentage, discounted_total, synced_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                ON CONFLICT (cart_id, product_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    price = EXCLUDED.price,
                    quantity = EXCLUDED.quantity,
                    total = EXCLUDED.total,
                    discount_percentage = EXCLUDED.discount_percentage,
                    discounted_total = EXCLUDED.discounted_total,
                    synced_at = NOW()
                ",
            )
            .bind(cart_id)
            .bind(item.product.id)
            .bind(&item.product.title)
            .bind(item.product.price)
            .bind(column_i32(item.quantity, "quantity")?)
            .bind(item.total)
            .bind(item.discount_percentage)
            .bind(item.discounted_total)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogReader for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn top_spenders(&self, limit: u32) -> Result<Vec<TopSpender>, StoreError> {
        let rows = sqlx::query_as::<_, TopSpenderRow>(
            r"
            SELECT u.id AS user_id, u.first_name, u.last_name,
                   SUM(c.discounted_total) AS total_spend
            FROM users u
            JOIN carts c ON c.user_id = u.id
            GROUP BY u.id, u.first_name, u.last_name
            ORDER BY total_spend DESC, u.id ASC
            LIMIT $1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn top_sellers(&self, limit: u32) -> Result<Vec<TopSeller>, StoreError> {
        // The title of the most recent cart (highest id) names the product.
        let rows = sqlx::query_as::<_, TopSellerRow>(
            r"
            SELECT product_id,
                   (ARRAY_AGG(title ORDER BY cart_id DESC))[1] AS title,
                   SUM(quantity)::BIGINT AS total_quantity_sold
            FROM cart_items
            GROUP BY product_id
            ORDER BY total_quantity_sold DESC, product_id ASC
            LIMIT $1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
