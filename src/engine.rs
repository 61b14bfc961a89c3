use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Item, Order, OrderLine};
use crate::store::{Store, StoreError};

// ============================================================================
// Order Engine
// ============================================================================
//
// Owns the order lifecycle: create, full replace, delete, and reads, with
// availability bookkeeping on items and per-user ownership enforcement.
//
// Every mutation runs in two phases. Validation reads complete first and
// never write anything; the write phase is a single atomic store operation
// that re-checks availability under the store's own locking, so no partial
// state is ever observable. Ownership failures on existing orders are
// reported as NotFound, indistinguishable from a missing order id, so a
// caller cannot probe for other users' orders.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("user {0} does not exist")]
    InvalidUser(Uuid),

    #[error("orders can only be created for the authenticated user")]
    Unauthorized,

    #[error("invalid item list: {0}")]
    InvalidItemList(#[from] ItemListError),

    #[error("insufficient availability for item {item_id}")]
    InsufficientAvailability { item_id: Uuid },

    #[error("order not found")]
    NotFound,

    #[error("field `{0}` cannot be changed after creation")]
    ImmutableFieldViolation(&'static str),

    #[error("concurrent update detected, request may be retried")]
    TransactionConflict,

    #[error("storage failure: {0}")]
    Store(StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ItemListError {
    #[error("item list is empty")]
    Empty,

    #[error("duplicate item {0}")]
    Duplicate(Uuid),

    #[error("unknown item {0}")]
    Unknown(Uuid),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i32),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            // Guard failure inside the write phase: a concurrent writer
            // drained the stock between our pre-check and the commit.
            StoreError::AvailabilityExhausted { item_id } => {
                OrderError::InsufficientAvailability { item_id }
            }
            StoreError::Serialization => OrderError::TransactionConflict,
            // The order vanished between lookup and write phase.
            StoreError::RowNotFound => OrderError::NotFound,
            other => OrderError::Store(other),
        }
    }
}

/// One validated entry of a requested item list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemRequest {
    pub item_id: Uuid,
    pub quantity: i32,
}

/// Fields a replace payload may restate but never change.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredIdentity {
    pub order_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Parse the raw `(item_id, quantity)` pairs into typed requests before any
/// domain logic runs: empty lists, duplicates and non-positive quantities are
/// rejected here.
pub fn parse_item_list(raw: &[(Uuid, i32)]) -> Result<Vec<ItemRequest>, ItemListError> {
    if raw.is_empty() {
        return Err(ItemListError::Empty);
    }

    let mut seen = HashSet::new();
    let mut requests = Vec::with_capacity(raw.len());

    for &(item_id, quantity) in raw {
        if !seen.insert(item_id) {
            return Err(ItemListError::Duplicate(item_id));
        }
        if quantity <= 0 {
            return Err(ItemListError::NonPositiveQuantity(quantity));
        }
        requests.push(ItemRequest { item_id, quantity });
    }

    Ok(requests)
}

#[derive(Clone)]
pub struct OrderEngine {
    store: Arc<dyn Store>,
}

impl OrderEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create an order for `user_id` on behalf of `caller`.
    ///
    /// Validation order: user exists, caller owns the target, item list is
    /// well formed and resolvable, every quantity fits current availability.
    /// Only then does the atomic write phase run.
    pub async fn create(
        &self,
        caller: Uuid,
        user_id: Uuid,
        raw_items: &[(Uuid, i32)],
    ) -> Result<Order, OrderError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(OrderError::InvalidUser(user_id))?;

        if user.user_id != caller {
            return Err(OrderError::Unauthorized);
        }

        let requests = parse_item_list(raw_items)?;
        let items = self.resolve_items(&requests).await?;

        for request in &requests {
            let item = &items[&request.item_id];
            if request.quantity > item.availability {
                return Err(OrderError::InsufficientAvailability {
                    item_id: request.item_id,
                });
            }
        }

        let order = build_order(Uuid::new_v4(), user_id, Utc::now(), &requests, &items);

        tracing::info!(
            order_id = %order.order_id,
            user_id = %user_id,
            item_count = order.items.len(),
            total_price = %order.total_price,
            "Creating order"
        );

        self.store.insert_order(&order).await?;
        Ok(order)
    }

    /// Replace the full item set of an existing order owned by `caller`.
    ///
    /// The availability check runs against the would-be availability with
    /// this order's current reservation released first, so shrinking and
    /// re-growing a quantity on the same item is never falsely rejected.
    pub async fn replace(
        &self,
        caller: Uuid,
        order_id: Uuid,
        raw_items: &[(Uuid, i32)],
        declared: &DeclaredIdentity,
    ) -> Result<Order, OrderError> {
        let current = self.owned_order(caller, order_id).await?;

        if declared.order_id.is_some_and(|id| id != current.order_id) {
            return Err(OrderError::ImmutableFieldViolation("order_id"));
        }
        if declared.user_id.is_some_and(|id| id != current.user_id) {
            return Err(OrderError::ImmutableFieldViolation("user_id"));
        }
        if declared.created_at.is_some_and(|ts| ts != current.created_at) {
            return Err(OrderError::ImmutableFieldViolation("created_at"));
        }

        let requests = parse_item_list(raw_items)?;
        let items = self.resolve_items(&requests).await?;

        for request in &requests {
            let item = &items[&request.item_id];
            let releasable = current.reserved_quantity(request.item_id);
            if request.quantity > item.availability + releasable {
                return Err(OrderError::InsufficientAvailability {
                    item_id: request.item_id,
                });
            }
        }

        let order = build_order(
            current.order_id,
            current.user_id,
            current.created_at,
            &requests,
            &items,
        );

        tracing::info!(
            order_id = %order.order_id,
            item_count = order.items.len(),
            total_price = %order.total_price,
            "Replacing order item set"
        );

        self.store.replace_order(&order).await?;
        Ok(order)
    }

    /// Delete an order owned by `caller`, restoring every reserved quantity.
    pub async fn delete(&self, caller: Uuid, order_id: Uuid) -> Result<(), OrderError> {
        let order = self.owned_order(caller, order_id).await?;

        tracing::info!(
            order_id = %order.order_id,
            item_count = order.items.len(),
            "Deleting order"
        );

        self.store.delete_order(order.order_id).await?;
        Ok(())
    }

    pub async fn get(&self, caller: Uuid, order_id: Uuid) -> Result<Order, OrderError> {
        self.owned_order(caller, order_id).await
    }

    pub async fn list(&self, caller: Uuid) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.list_orders(caller).await?)
    }

    /// Existence and ownership checked together: an order belonging to a
    /// different user is reported exactly like a missing one.
    async fn owned_order(&self, caller: Uuid, order_id: Uuid) -> Result<Order, OrderError> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == caller)
            .ok_or(OrderError::NotFound)
    }

    async fn resolve_items(
        &self,
        requests: &[ItemRequest],
    ) -> Result<HashMap<Uuid, Item>, OrderError> {
        let ids: Vec<Uuid> = requests.iter().map(|r| r.item_id).collect();
        let items: HashMap<Uuid, Item> = self
            .store
            .get_items(&ids)
            .await?
            .into_iter()
            .map(|item| (item.item_id, item))
            .collect();

        for request in requests {
            if !items.contains_key(&request.item_id) {
                return Err(ItemListError::Unknown(request.item_id).into());
            }
        }

        Ok(items)
    }
}

/// Assemble the order with per-line subtotals priced now and the derived
/// total. Callers guarantee every request resolves in `items`.
fn build_order(
    order_id: Uuid,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    requests: &[ItemRequest],
    items: &HashMap<Uuid, Item>,
) -> Order {
    let lines: Vec<OrderLine> = requests
        .iter()
        .map(|request| OrderLine {
            item_id: request.item_id,
            quantity: request.quantity,
            subtotal: items[&request.item_id].price * Decimal::from(request.quantity),
        })
        .collect();

    let total_price: Decimal = lines.iter().map(|line| line.subtotal).sum();

    Order {
        order_id,
        user_id,
        total_price,
        created_at,
        items: lines,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
