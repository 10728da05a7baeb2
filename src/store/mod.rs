//! Order persistence.
//!
//! [`OrderStore`] is the single capability the services depend on. Two
//! backends implement it: [`MemoryOrderStore`] (one lock-guarded table) and
//! [`PgOrderStore`] (PostgreSQL transactions). Which one is used is decided
//! when the application state is built.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewOrder, Order, OrderItem, OrderStatus, PricedLine, StockStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order {0} is not a cart")]
    NotCart(Uuid),

    #[error("cart {0} is empty")]
    EmptyCart(Uuid),

    #[error("product {product_id} is not in order {order_id}")]
    ItemNotFound { order_id: Uuid, product_id: i64 },

    #[error("cart {0} changed while it was being checked out")]
    CartChanged(Uuid),

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("could not settle a cart for user '{0}'")]
    CartUnavailable(String),

    #[error("quantity must be greater than 0, got {0}")]
    InvalidQuantity(i32),

    #[error("product {product_id} is limited to {limit} units, {requested} requested")]
    QuantityLimit {
        product_id: i64,
        limit: i32,
        requested: i32,
    },

    #[error("order total exceeds the supported amount range")]
    AmountOverflow,

    #[error("ORM error: {0}")]
    Orm(#[from] sea_orm::DbErr),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Every method is atomic: a concurrent caller observes either the state
/// before the call or the state after it.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Returns the user's cart, creating it on first access. At most one
    /// cart exists per user.
    async fn get_or_create_cart(&self, user_id: &str) -> Result<Order, StoreError>;

    /// Adds `quantity` of a product to a cart, merging into an existing line.
    /// With a `limit`, the merged line quantity may not exceed it; the check
    /// and the write happen in the same atomic step.
    async fn add_item(
        &self,
        order_id: Uuid,
        product_id: i64,
        quantity: i32,
        limit: Option<i32>,
    ) -> Result<OrderItem, StoreError>;

    async fn remove_item(&self, order_id: Uuid, product_id: i64) -> Result<(), StoreError>;

    async fn list_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;

    /// Commits a cart. `lines` must describe exactly the cart's current items;
    /// their unit prices are captured and the total is set.
    async fn checkout(&self, order_id: Uuid, lines: &[PricedLine]) -> Result<Order, StoreError>;

    /// Committed orders of a user. No orders is an empty list.
    async fn list_completed(&self, user_id: &str) -> Result<Vec<Order>, StoreError>;

    /// Inserts a committed order and all of its items as one unit.
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError>;

    /// Moves an order forward and returns the re-read aggregate, or `None`
    /// when the order does not exist.
    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;

    async fn set_stock_status(
        &self,
        order_id: Uuid,
        stock_status: StockStatus,
    ) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn OrderStore>;

/// Checks that a priced snapshot lists the same products and quantities as
/// the cart's current items, in any order.
pub(crate) fn matches_cart(items: &[OrderItem], lines: &[PricedLine]) -> bool {
    items.len() == lines.len()
        && items.iter().all(|item| {
            lines
                .iter()
                .any(|line| line.product_id == item.product_id && line.quantity == item.quantity)
        })
}
