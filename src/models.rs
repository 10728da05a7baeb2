use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of an order. `Cart` is the only pre-commit state; everything
/// after it is reached through checkout/create and then moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Cart,
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Cart => "CART",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_committed(&self) -> bool {
        *self != OrderStatus::Cart
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    // Position on the fulfilment path; cancelled/failed sit off the path.
    fn fulfilment_step(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(1),
            OrderStatus::Paid => Some(2),
            OrderStatus::Processing => Some(3),
            OrderStatus::Shipped => Some(4),
            OrderStatus::Delivered => Some(5),
            OrderStatus::Completed => Some(6),
            OrderStatus::Cart | OrderStatus::Cancelled | OrderStatus::Failed => None,
        }
    }

    /// Whether an explicit status update may move an order from `self` to
    /// `next`. Leaving `Cart` is reserved for checkout.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if !self.is_committed() || !next.is_committed() || self.is_terminal() {
            return false;
        }
        match next {
            OrderStatus::Cancelled | OrderStatus::Failed => true,
            _ => match (self.fulfilment_step(), next.fulfilment_step()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CART" => Ok(OrderStatus::Cart),
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Outcome of the catalog stock decrement that follows a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    Pending,
    Applied,
    Failed,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Pending => "PENDING",
            StockStatus::Applied => "APPLIED",
            StockStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for StockStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StockStatus::Pending),
            "APPLIED" => Ok(StockStatus::Applied),
            "FAILED" => Ok(StockStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: i64,
    pub quantity: i32,
    /// Unit price in minor units, captured when the order is committed.
    pub price: Option<i64>,
}

impl OrderItem {
    /// `None` when the product overflows `i64`.
    pub fn line_total(&self) -> Option<i64> {
        self.price.unwrap_or(0).checked_mul(i64::from(self.quantity))
    }
}

/// The order aggregate: header plus its full item collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub total_price: i64,
    pub status: OrderStatus,
    pub stock_status: StockStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn new_cart(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            total_price: 0,
            status: OrderStatus::Cart,
            stock_status: StockStatus::Pending,
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        }
    }

    pub fn is_cart(&self) -> bool {
        self.status == OrderStatus::Cart
    }
}

pub fn items_total(items: &[OrderItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |total, item| total.checked_add(item.line_total()?))
}

/// Price times quantity in minor units, `None` on overflow.
pub fn line_amount(unit_price: i64, quantity: i32) -> Option<i64> {
    unit_price.checked_mul(i64::from(quantity))
}

/// A line whose unit price has been read from the catalog and is ready to be
/// persisted with a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: i64,
}

impl PricedLine {
    pub fn line_total(&self) -> Option<i64> {
        line_amount(self.unit_price, self.quantity)
    }
}

pub fn lines_total(lines: &[PricedLine]) -> Option<i64> {
    lines
        .iter()
        .try_fold(0i64, |total, line| total.checked_add(line.line_total()?))
}

/// A fully priced order ready for an atomic insert.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub lines: Vec<PricedLine>,
}

impl NewOrder {
    pub fn total_price(&self) -> Option<i64> {
        lines_total(&self.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_cannot_be_left_through_status_update() {
        assert!(!OrderStatus::Cart.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Cart));
    }

    #[test]
    fn fulfilment_moves_forward_only() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for terminal in [
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(OrderStatus::Pending));
            assert!(!terminal.can_transition_to(OrderStatus::Cancelled));
        }
    }

    #[test]
    fn cancel_and_fail_reachable_from_open_states() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Failed));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("shipped".parse::<OrderStatus>(), Ok(OrderStatus::Shipped));
        assert_eq!(
            "LOST".parse::<OrderStatus>(),
            Err(UnknownStatus("LOST".to_string()))
        );
    }

    #[test]
    fn total_sums_captured_prices() {
        let order_id = Uuid::new_v4();
        let items = vec![
            OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: 1,
                quantity: 3,
                price: Some(250),
            },
            OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: 2,
                quantity: 1,
                price: Some(1000),
            },
        ];
        assert_eq!(items_total(&items), Some(1750));
    }

    #[test]
    fn totals_report_overflow_instead_of_wrapping() {
        assert_eq!(line_amount(i64::MAX / 2, 3), None);

        let lines = vec![
            PricedLine {
                product_id: 1,
                quantity: 1,
                unit_price: i64::MAX,
            },
            PricedLine {
                product_id: 2,
                quantity: 1,
                unit_price: 1,
            },
        ];
        assert_eq!(lines_total(&lines), None);
        assert_eq!(lines_total(&lines[..1]), Some(i64::MAX));
    }
}
