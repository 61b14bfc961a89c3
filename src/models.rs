use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Domain Models
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Salted password digest. Never serialized in API responses.
    #[serde(skip_serializing)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Item {
    pub item_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub description: String,
    /// Remaining purchasable stock count. Adjusted only by the order engine.
    pub availability: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Address {
    pub address_id: Uuid,
    pub user_id: Uuid,
    pub country: String,
    pub city: String,
    pub post_code: String,
    pub address: String,
    pub phone: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Order {
    pub order_id: Uuid,
    pub user_id: Uuid,
    /// Always derived: sum of line subtotals, recomputed on every write.
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderLine>,
}

/// One line of an order: quantity of a single item, priced at order-write time.
/// Lines exist only within their order's lifetime and are not independently
/// addressable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderLine {
    pub item_id: Uuid,
    pub quantity: i32,
    pub subtotal: Decimal,
}

impl Order {
    /// Quantity this order currently holds for `item_id`, zero if absent.
    pub fn reserved_quantity(&self, item_id: Uuid) -> i32 {
        self.items
            .iter()
            .filter(|line| line.item_id == item_id)
            .map(|line| line.quantity)
            .sum()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_never_serialized() {
        let user = User {
            user_id: Uuid::new_v4(),
            first_name: "Anna".into(),
            last_name: "Markis".into(),
            email: "anna@markis.com".into(),
            password: "v1$c2FsdA$ZGlnZXN0".into(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(json.contains("anna@markis.com"));
    }

    #[test]
    fn test_order_reserved_quantity() {
        let item_id = Uuid::new_v4();
        let order = Order {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_price: Decimal::new(3000, 2),
            created_at: Utc::now(),
            items: vec![OrderLine {
                item_id,
                quantity: 3,
                subtotal: Decimal::new(3000, 2),
            }],
        };

        assert_eq!(order.reserved_quantity(item_id), 3);
        assert_eq!(order.reserved_quantity(Uuid::new_v4()), 0);
    }

    #[test]
    fn test_order_line_serialization() {
        let line = OrderLine {
            item_id: Uuid::new_v4(),
            quantity: 2,
            subtotal: Decimal::new(4198, 2),
        };

        let json = serde_json::to_string(&line).unwrap();
        let back: OrderLine = serde_json::from_str(&json).unwrap();
        assert_eq!(line, back);
    }
}
