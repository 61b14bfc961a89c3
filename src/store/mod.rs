mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Address, Item, Order, User};

pub use memory::MemStore;
pub use postgres::PgStore;

// ============================================================================
// Persistence Collaborator
// ============================================================================
//
// The engine and the HTTP handlers never touch the database directly; they go
// through this trait. Keyed lookups and list queries are plain reads. The
// three order write operations (insert/replace/delete) are each one atomic
// write phase: every row mutation inside them commits together or not at all,
// and availability adjustments are applied as relative deltas with an
// in-transaction guard.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    RowNotFound,

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The guarded availability decrement found fewer units than requested
    /// at apply time. Distinct from the engine's pre-check: this one fires
    /// inside the transaction, after a concurrent writer got there first.
    #[error("availability exhausted for item {item_id}")]
    AvailabilityExhausted { item_id: Uuid },

    /// The backend aborted the transaction because of a concurrent
    /// conflicting writer (serialization failure or deadlock). Safe to
    /// retry at the caller's discretion.
    #[error("serialization conflict, transaction aborted")]
    Serialization,

    /// The row is still referenced by other rows; in this schema, an item
    /// referenced by live order lines.
    #[error("item is referenced by existing orders")]
    Referenced,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- users ----
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;
    async fn delete_user(&self, user_id: Uuid) -> Result<(), StoreError>;

    // ---- items ----
    async fn insert_item(&self, item: &Item) -> Result<(), StoreError>;
    async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>, StoreError>;
    /// Resolve a set of item ids. Unknown ids are simply absent from the
    /// result; the caller decides whether that is an error.
    async fn get_items(&self, item_ids: &[Uuid]) -> Result<Vec<Item>, StoreError>;
    async fn list_items(&self) -> Result<Vec<Item>, StoreError>;
    async fn update_item(&self, item: &Item) -> Result<(), StoreError>;
    async fn delete_item(&self, item_id: Uuid) -> Result<(), StoreError>;

    // ---- addresses ----
    async fn insert_address(&self, address: &Address) -> Result<(), StoreError>;
    async fn get_address(&self, address_id: Uuid) -> Result<Option<Address>, StoreError>;
    async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<Address>, StoreError>;
    async fn update_address(&self, address: &Address) -> Result<(), StoreError>;
    async fn delete_address(&self, address_id: Uuid) -> Result<(), StoreError>;

    // ---- orders ----
    /// Load one order with its lines, as a consistent snapshot.
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;
    /// All orders owned by `user_id`, each a consistent snapshot.
    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;

    /// Atomically: insert the order row, insert one line row per item, and
    /// decrement each item's availability by the line quantity. Fails with
    /// `AvailabilityExhausted` (rolling everything back) if any guarded
    /// decrement would take availability below zero.
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Atomically: restore availability held by the order's current lines,
    /// delete those lines, insert the new lines with guarded decrements, and
    /// persist the recomputed total. The order row's identity, owner and
    /// creation time are untouched.
    async fn replace_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Atomically: restore availability for every line, delete the lines,
    /// delete the order row.
    async fn delete_order(&self, order_id: Uuid) -> Result<(), StoreError>;
}
