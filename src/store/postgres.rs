use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::models::{Address, Item, Order, OrderLine, User};

use super::{Store, StoreError};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Row-level locking is the only concurrency control: availability is mutated
// with relative deltas guarded in SQL (`availability >= $n`), never by
// read-then-overwrite of an absolute value, so concurrent reservations
// against the same item serialize on the row lock. A guarded decrement that
// matches zero rows means a concurrent writer drained the stock first; the
// transaction is rolled back and the failure surfaces as
// `AvailabilityExhausted`.
//
// ============================================================================

pub struct PgStore {
    pool: PgPool,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        user_id UUID PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS items (
        item_id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        price NUMERIC NOT NULL CHECK (price >= 0),
        description TEXT NOT NULL,
        availability INTEGER NOT NULL CHECK (availability >= 0)
    )",
    "CREATE TABLE IF NOT EXISTS addresses (
        address_id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users (user_id) ON DELETE CASCADE,
        country TEXT NOT NULL,
        city TEXT NOT NULL,
        post_code TEXT NOT NULL,
        address TEXT NOT NULL,
        phone TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        order_id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users (user_id) ON DELETE CASCADE,
        total_price NUMERIC NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS order_items (
        order_id UUID NOT NULL REFERENCES orders (order_id) ON DELETE CASCADE,
        item_id UUID NOT NULL REFERENCES items (item_id),
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        subtotal NUMERIC NOT NULL,
        PRIMARY KEY (order_id, item_id)
    )",
];

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet. Called once at startup.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
        }
        tracing::info!("Database schema ready");
        Ok(())
    }
}

/// Translate backend failures the engine cares about: transaction aborts
/// caused by concurrent writers are retryable, unique violations carry the
/// offending constraint, foreign-key violations mean a referenced row.
fn map_db_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(code) if is_concurrent_abort(code) => return StoreError::Serialization,
            Some("23505") => {
                return StoreError::DuplicateKey(
                    db.constraint().unwrap_or("unique constraint").to_string(),
                )
            }
            Some("23503") => return StoreError::Referenced,
            _ => {}
        }
    }
    StoreError::Database(err)
}

/// SQLSTATEs raised when a concurrent writer forced this transaction to
/// abort: serialization_failure (40001, repeatable read and stricter) and
/// deadlock_detected (40P01, which read committed raises when two orders
/// take the same item row locks in opposite payload order).
fn is_concurrent_abort(code: &str) -> bool {
    matches!(code, "40001" | "40P01")
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        password: row.try_get("password")?,
        created_at: row.try_get("created_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        item_id: row.try_get("item_id")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        description: row.try_get("description")?,
        availability: row.try_get("availability")?,
    })
}

fn address_from_row(row: &PgRow) -> Result<Address, sqlx::Error> {
    Ok(Address {
        address_id: row.try_get("address_id")?,
        user_id: row.try_get("user_id")?,
        country: row.try_get("country")?,
        city: row.try_get("city")?,
        post_code: row.try_get("post_code")?,
        address: row.try_get("address")?,
        phone: row.try_get("phone")?,
    })
}

/// Fold joined order/line rows into `Order` values. Rows must be sorted by
/// order_id; a NULL line item_id means the order has no lines.
fn fold_order_rows(rows: Vec<PgRow>) -> Result<Vec<Order>, sqlx::Error> {
    let mut orders: Vec<Order> = Vec::new();

    for row in rows {
        let order_id: Uuid = row.try_get("order_id")?;
        if orders.last().map(|o| o.order_id) != Some(order_id) {
            orders.push(Order {
                order_id,
                user_id: row.try_get("user_id")?,
                total_price: row.try_get("total_price")?,
                created_at: row.try_get("created_at")?,
                items: Vec::new(),
            });
        }

        if let Some(item_id) = row.try_get::<Option<Uuid>, _>("item_id")? {
            let order = orders.last_mut().unwrap();
            order.items.push(OrderLine {
                item_id,
                quantity: row.try_get("quantity")?,
                subtotal: row.try_get("subtotal")?,
            });
        }
    }

    Ok(orders)
}

const ORDER_SELECT: &str = "SELECT o.order_id, o.user_id, o.total_price, o.created_at, \
     oi.item_id, oi.quantity, oi.subtotal \
     FROM orders o LEFT JOIN order_items oi USING (order_id)";

#[async_trait]
impl Store for PgStore {
    // ---- users ----

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (user_id, first_name, last_name, email, password, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.user_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(user_from_row).transpose().map_err(map_db_err)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(user_from_row).transpose().map_err(map_db_err)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(user_from_row).collect::<Result<_, _>>().map_err(map_db_err)
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET first_name = $2, last_name = $3, email = $4, password = $5 \
             WHERE user_id = $1",
        )
        .bind(user.user_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    // ---- items ----

    async fn insert_item(&self, item: &Item) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO items (item_id, name, price, description, availability) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.item_id)
        .bind(&item.name)
        .bind(item.price)
        .bind(&item.description)
        .bind(item.availability)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query("SELECT * FROM items WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(item_from_row).transpose().map_err(map_db_err)
    }

    async fn get_items(&self, item_ids: &[Uuid]) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query("SELECT * FROM items WHERE item_id = ANY($1)")
            .bind(item_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(item_from_row).collect::<Result<_, _>>().map_err(map_db_err)
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query("SELECT * FROM items ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(item_from_row).collect::<Result<_, _>>().map_err(map_db_err)
    }

    async fn update_item(&self, item: &Item) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE items SET name = $2, price = $3, description = $4, availability = $5 \
             WHERE item_id = $1",
        )
        .bind(item.item_id)
        .bind(&item.name)
        .bind(item.price)
        .bind(&item.description)
        .bind(item.availability)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM items WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    // ---- addresses ----

    async fn insert_address(&self, address: &Address) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO addresses (address_id, user_id, country, city, post_code, address, phone) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(address.address_id)
        .bind(address.user_id)
        .bind(&address.country)
        .bind(&address.city)
        .bind(&address.post_code)
        .bind(&address.address)
        .bind(&address.phone)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_address(&self, address_id: Uuid) -> Result<Option<Address>, StoreError> {
        let row = sqlx::query("SELECT * FROM addresses WHERE address_id = $1")
            .bind(address_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.as_ref().map(address_from_row).transpose().map_err(map_db_err)
    }

    async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<Address>, StoreError> {
        let rows = sqlx::query("SELECT * FROM addresses WHERE user_id = $1 ORDER BY address_id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.iter().map(address_from_row).collect::<Result<_, _>>().map_err(map_db_err)
    }

    async fn update_address(&self, address: &Address) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE addresses SET country = $2, city = $3, post_code = $4, address = $5, phone = $6 \
             WHERE address_id = $1",
        )
        .bind(address.address_id)
        .bind(&address.country)
        .bind(&address.city)
        .bind(&address.post_code)
        .bind(&address.address)
        .bind(&address.phone)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn delete_address(&self, address_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM addresses WHERE address_id = $1")
            .bind(address_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    // ---- orders ----

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        // Single joined query: one statement, one snapshot.
        let rows = sqlx::query(&format!("{ORDER_SELECT} WHERE o.order_id = $1"))
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        let mut orders = fold_order_rows(rows).map_err(map_db_err)?;
        Ok(orders.pop())
    }

    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "{ORDER_SELECT} WHERE o.user_id = $1 ORDER BY o.created_at, o.order_id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        fold_order_rows(rows).map_err(map_db_err)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        // Guarded relative decrements first: they take the row locks that
        // serialize concurrent reservations of the same item.
        for line in &order.items {
            let result = sqlx::query(
                "UPDATE items SET availability = availability - $2 \
                 WHERE item_id = $1 AND availability >= $2",
            )
            .bind(line.item_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back prior decrements.
                return Err(StoreError::AvailabilityExhausted {
                    item_id: line.item_id,
                });
            }
        }

        sqlx::query(
            "INSERT INTO orders (order_id, user_id, total_price, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.total_price)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        for line in &order.items {
            sqlx::query(
                "INSERT INTO order_items (order_id, item_id, quantity, subtotal) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order.order_id)
            .bind(line.item_id)
            .bind(line.quantity)
            .bind(line.subtotal)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)
    }

    async fn replace_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let locked = sqlx::query("SELECT order_id FROM orders WHERE order_id = $1 FOR UPDATE")
            .bind(order.order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?;
        if locked.is_none() {
            return Err(StoreError::RowNotFound);
        }

        // Re-read the current reservation inside the transaction, restore it,
        // then reserve the new quantities with guarded decrements.
        let old_lines =
            sqlx::query("SELECT item_id, quantity FROM order_items WHERE order_id = $1 FOR UPDATE")
                .bind(order.order_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(map_db_err)?;

        for row in &old_lines {
            let item_id: Uuid = row.try_get("item_id").map_err(map_db_err)?;
            let quantity: i32 = row.try_get("quantity").map_err(map_db_err)?;
            sqlx::query("UPDATE items SET availability = availability + $2 WHERE item_id = $1")
                .bind(item_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order.order_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        for line in &order.items {
            let result = sqlx::query(
                "UPDATE items SET availability = availability - $2 \
                 WHERE item_id = $1 AND availability >= $2",
            )
            .bind(line.item_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::AvailabilityExhausted {
                    item_id: line.item_id,
                });
            }

            sqlx::query(
                "INSERT INTO order_items (order_id, item_id, quantity, subtotal) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order.order_id)
            .bind(line.item_id)
            .bind(line.quantity)
            .bind(line.subtotal)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        sqlx::query("UPDATE orders SET total_price = $2 WHERE order_id = $1")
            .bind(order.order_id)
            .bind(order.total_price)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let locked = sqlx::query("SELECT order_id FROM orders WHERE order_id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?;
        if locked.is_none() {
            return Err(StoreError::RowNotFound);
        }

        let lines =
            sqlx::query("SELECT item_id, quantity FROM order_items WHERE order_id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(map_db_err)?;

        for row in &lines {
            let item_id: Uuid = row.try_get("item_id").map_err(map_db_err)?;
            let quantity: i32 = row.try_get("quantity").map_err(map_db_err)?;
            sqlx::query("UPDATE items SET availability = availability + $2 WHERE item_id = $1")
                .bind(item_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        sqlx::query("DELETE FROM orders WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
