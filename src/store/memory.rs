use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Address, Item, Order, User};

use super::{Store, StoreError};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Backs the unit tests (no live database needed) and serializes every write
// phase under a single lock, so each order operation is trivially
// all-or-nothing: availability is checked and applied without releasing the
// lock in between.
//
// ============================================================================

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    items: HashMap<Uuid, Item>,
    addresses: HashMap<Uuid, Address>,
    orders: HashMap<Uuid, Order>,
}

#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    /// Guarded availability check for a prospective set of lines, given the
    /// quantities `released` back by the order being replaced or deleted.
    fn check_availability(
        &self,
        order: &Order,
        released: &HashMap<Uuid, i32>,
    ) -> Result<(), StoreError> {
        for line in &order.items {
            let available = self
                .items
                .get(&line.item_id)
                .map(|item| item.availability)
                .unwrap_or(0)
                + released.get(&line.item_id).copied().unwrap_or(0);

            if line.quantity > available {
                return Err(StoreError::AvailabilityExhausted {
                    item_id: line.item_id,
                });
            }
        }
        Ok(())
    }

    fn adjust_availability(&mut self, item_id: Uuid, delta: i32) {
        if let Some(item) = self.items.get_mut(&item_id) {
            item.availability += delta;
        }
    }

    fn release_order(&mut self, order_id: Uuid) -> HashMap<Uuid, i32> {
        let mut released = HashMap::new();
        if let Some(order) = self.orders.get(&order_id) {
            for line in order.items.clone() {
                *released.entry(line.item_id).or_insert(0) += line.quantity;
            }
        }
        released
    }
}

#[async_trait]
impl Store for MemStore {
    // ---- users ----

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateKey(user.email.clone()));
        }
        state.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user.user_id) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound),
        }
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .users
            .remove(&user_id)
            .map(|_| ())
            .ok_or(StoreError::RowNotFound)
    }

    // ---- items ----

    async fn insert_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.items.insert(item.item_id, item.clone());
        Ok(())
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>, StoreError> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn get_items(&self, item_ids: &[Uuid]) -> Result<Vec<Item>, StoreError> {
        let state = self.state.lock().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect())
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let state = self.state.lock().await;
        let mut items: Vec<Item> = state.items.values().cloned().collect();
        items.sort_by_key(|i| i.item_id);
        Ok(items)
    }

    async fn update_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.items.get_mut(&item.item_id) {
            Some(slot) => {
                *slot = item.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound),
        }
    }

    async fn delete_item(&self, item_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        // Same rule the relational backend enforces through its foreign key:
        // an item held by live order lines cannot be removed.
        let referenced = state
            .orders
            .values()
            .any(|order| order.items.iter().any(|line| line.item_id == item_id));
        if referenced {
            return Err(StoreError::Referenced);
        }

        state
            .items
            .remove(&item_id)
            .map(|_| ())
            .ok_or(StoreError::RowNotFound)
    }

    // ---- addresses ----

    async fn insert_address(&self, address: &Address) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.addresses.insert(address.address_id, address.clone());
        Ok(())
    }

    async fn get_address(&self, address_id: Uuid) -> Result<Option<Address>, StoreError> {
        Ok(self.state.lock().await.addresses.get(&address_id).cloned())
    }

    async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<Address>, StoreError> {
        let state = self.state.lock().await;
        let mut addresses: Vec<Address> = state
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by_key(|a| a.address_id);
        Ok(addresses)
    }

    async fn update_address(&self, address: &Address) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.addresses.get_mut(&address.address_id) {
            Some(slot) => {
                *slot = address.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound),
        }
    }

    async fn delete_address(&self, address_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .addresses
            .remove(&address_id)
            .map(|_| ())
            .ok_or(StoreError::RowNotFound)
    }

    // ---- orders ----

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        state.check_availability(order, &HashMap::new())?;

        for line in &order.items {
            state.adjust_availability(line.item_id, -line.quantity);
        }
        state.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn replace_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        if !state.orders.contains_key(&order.order_id) {
            return Err(StoreError::RowNotFound);
        }

        // Check against would-be availability with the old reservation
        // released, then apply restore and reserve in one critical section.
        let released = state.release_order(order.order_id);
        state.check_availability(order, &released)?;

        for (item_id, quantity) in released {
            state.adjust_availability(item_id, quantity);
        }
        for line in &order.items {
            state.adjust_availability(line.item_id, -line.quantity);
        }
        state.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        if !state.orders.contains_key(&order_id) {
            return Err(StoreError::RowNotFound);
        }

        let released = state.release_order(order_id);
        for (item_id, quantity) in released {
            state.adjust_availability(item_id, quantity);
        }
        state.orders.remove(&order_id);
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderLine;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn item(availability: i32) -> Item {
        Item {
            item_id: Uuid::new_v4(),
            name: "widget".into(),
            price: Decimal::new(500, 2),
            description: "a widget".into(),
            availability,
        }
    }

    fn order_for(lines: Vec<OrderLine>) -> Order {
        Order {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_price: lines.iter().map(|l| l.subtotal).sum(),
            created_at: Utc::now(),
            items: lines,
        }
    }

    #[tokio::test]
    async fn test_insert_order_decrements_availability() {
        let store = MemStore::new();
        let item = item(5);
        store.insert_item(&item).await.unwrap();

        let order = order_for(vec![OrderLine {
            item_id: item.item_id,
            quantity: 3,
            subtotal: Decimal::new(1500, 2),
        }]);
        store.insert_order(&order).await.unwrap();

        let stored = store.get_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(stored.availability, 2);
    }

    #[tokio::test]
    async fn test_insert_order_is_all_or_nothing() {
        let store = MemStore::new();
        let plenty = item(10);
        let scarce = item(1);
        store.insert_item(&plenty).await.unwrap();
        store.insert_item(&scarce).await.unwrap();

        let order = order_for(vec![
            OrderLine {
                item_id: plenty.item_id,
                quantity: 2,
                subtotal: Decimal::new(1000, 2),
            },
            OrderLine {
                item_id: scarce.item_id,
                quantity: 2,
                subtotal: Decimal::new(1000, 2),
            },
        ]);

        let err = store.insert_order(&order).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::AvailabilityExhausted { item_id } if item_id == scarce.item_id
        ));

        // Nothing moved: neither item lost stock, no order row exists.
        assert_eq!(
            store
                .get_item(plenty.item_id)
                .await
                .unwrap()
                .unwrap()
                .availability,
            10
        );
        assert!(store.get_order(order.order_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_order_releases_before_checking() {
        let store = MemStore::new();
        let item = item(5);
        store.insert_item(&item).await.unwrap();

        let mut order = order_for(vec![OrderLine {
            item_id: item.item_id,
            quantity: 3,
            subtotal: Decimal::new(1500, 2),
        }]);
        store.insert_order(&order).await.unwrap();
        assert_eq!(
            store
                .get_item(item.item_id)
                .await
                .unwrap()
                .unwrap()
                .availability,
            2
        );

        // 5 > 2 remaining, but the order's own 3 units are released first.
        order.items = vec![OrderLine {
            item_id: item.item_id,
            quantity: 5,
            subtotal: Decimal::new(2500, 2),
        }];
        order.total_price = Decimal::new(2500, 2);
        store.replace_order(&order).await.unwrap();

        assert_eq!(
            store
                .get_item(item.item_id)
                .await
                .unwrap()
                .unwrap()
                .availability,
            0
        );
    }

    #[tokio::test]
    async fn test_delete_order_restores_availability() {
        let store = MemStore::new();
        let item = item(5);
        store.insert_item(&item).await.unwrap();

        let order = order_for(vec![OrderLine {
            item_id: item.item_id,
            quantity: 4,
            subtotal: Decimal::new(2000, 2),
        }]);
        store.insert_order(&order).await.unwrap();
        store.delete_order(order.order_id).await.unwrap();

        assert_eq!(
            store
                .get_item(item.item_id)
                .await
                .unwrap()
                .unwrap()
                .availability,
            5
        );
        assert!(store.get_order(order.order_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_item_held_by_live_order_is_rejected() {
        let store = MemStore::new();
        let item = item(5);
        store.insert_item(&item).await.unwrap();

        let order = order_for(vec![OrderLine {
            item_id: item.item_id,
            quantity: 2,
            subtotal: Decimal::new(1000, 2),
        }]);
        store.insert_order(&order).await.unwrap();

        // Mirrors the foreign key on order_items.item_id: lines must not be
        // orphaned, or a later replace/delete could not restore stock.
        assert!(matches!(
            store.delete_item(item.item_id).await,
            Err(StoreError::Referenced)
        ));
        assert!(store.get_item(item.item_id).await.unwrap().is_some());

        // Once the order is gone, the item can be removed.
        store.delete_order(order.order_id).await.unwrap();
        store.delete_item(item.item_id).await.unwrap();
        assert!(store.get_item(item.item_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemStore::new();
        let user = User {
            user_id: Uuid::new_v4(),
            first_name: "Giovanni".into(),
            last_name: "Mariani".into(),
            email: "giovanni@mariani.com".into(),
            password: "hash".into(),
            created_at: Utc::now(),
        };
        store.insert_user(&user).await.unwrap();

        let twin = User {
            user_id: Uuid::new_v4(),
            ..user.clone()
        };
        assert!(matches!(
            store.insert_user(&twin).await,
            Err(StoreError::DuplicateKey(_))
        ));
    }
}
