use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{OrderStore, StoreError, matches_cart};
use crate::models::{
    NewOrder, Order, OrderItem, OrderStatus, PricedLine, StockStatus, items_total, lines_total,
};

#[derive(Default)]
struct Table {
    orders: HashMap<Uuid, Order>,
    // user id -> id of that user's cart
    carts: HashMap<String, Uuid>,
}

impl Table {
    fn cart_mut(&mut self, order_id: Uuid) -> Result<&mut Order, StoreError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if !order.is_cart() {
            return Err(StoreError::NotCart(order_id));
        }
        Ok(order)
    }
}

/// In-process order table behind one reader/writer lock. Nothing awaits or
/// performs I/O while the lock is held.
#[derive(Default)]
pub struct MemoryOrderStore {
    table: RwLock<Table>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic in another caller cannot leave a half-applied mutation behind
    // (every write validates before it mutates), so a poisoned lock is reused.
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get_or_create_cart(&self, user_id: &str) -> Result<Order, StoreError> {
        let mut table = self.write();

        if let Some(order) = table
            .carts
            .get(user_id)
            .and_then(|id| table.orders.get(id))
            .filter(|order| order.is_cart())
        {
            return Ok(order.clone());
        }

        let cart = Order::new_cart(user_id);
        table.carts.insert(user_id.to_string(), cart.id);
        table.orders.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn add_item(
        &self,
        order_id: Uuid,
        product_id: i64,
        quantity: i32,
        limit: Option<i32>,
    ) -> Result<OrderItem, StoreError> {
        if quantity <= 0 {
            return Err(StoreError::InvalidQuantity(quantity));
        }

        let mut table = self.write();
        let order = table.cart_mut(order_id)?;

        let line = order
            .items
            .iter()
            .position(|item| item.product_id == product_id);
        let merged = match line {
            Some(index) => order.items[index]
                .quantity
                .checked_add(quantity)
                .ok_or(StoreError::InvalidQuantity(quantity))?,
            None => quantity,
        };
        if let Some(limit) = limit.filter(|limit| merged > *limit) {
            return Err(StoreError::QuantityLimit {
                product_id,
                limit,
                requested: merged,
            });
        }

        order.updated_at = Utc::now();
        if let Some(index) = line {
            order.items[index].quantity = merged;
            return Ok(order.items[index].clone());
        }

        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id,
            quantity,
            price: None,
        };
        order.items.push(item.clone());
        Ok(item)
    }

    async fn remove_item(&self, order_id: Uuid, product_id: i64) -> Result<(), StoreError> {
        let mut table = self.write();
        let order = table.cart_mut(order_id)?;

        let position = order
            .items
            .iter()
            .position(|item| item.product_id == product_id)
            .ok_or(StoreError::ItemNotFound {
                order_id,
                product_id,
            })?;
        order.items.remove(position);
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn list_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let table = self.read();
        table
            .orders
            .get(&order_id)
            .map(|order| order.items.clone())
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn checkout(&self, order_id: Uuid, lines: &[PricedLine]) -> Result<Order, StoreError> {
        let mut table = self.write();
        let order = table.cart_mut(order_id)?;

        if order.items.is_empty() {
            return Err(StoreError::EmptyCart(order_id));
        }
        if !matches_cart(&order.items, lines) {
            return Err(StoreError::CartChanged(order_id));
        }
        let total_price = lines_total(lines).ok_or(StoreError::AmountOverflow)?;

        for item in order.items.iter_mut() {
            item.price = lines
                .iter()
                .find(|line| line.product_id == item.product_id)
                .map(|line| line.unit_price);
        }
        order.total_price = total_price;
        order.status = OrderStatus::Pending;
        order.updated_at = Utc::now();

        let committed = order.clone();
        // The user's next cart access starts a fresh cart.
        table.carts.remove(&committed.user_id);
        Ok(committed)
    }

    async fn list_completed(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        let table = self.read();
        let mut orders: Vec<Order> = table
            .orders
            .values()
            .filter(|order| order.user_id == user_id && order.status.is_committed())
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn create_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        if let Some(line) = new_order.lines.iter().find(|line| line.quantity <= 0) {
            return Err(StoreError::InvalidQuantity(line.quantity));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let items: Vec<OrderItem> = new_order
            .lines
            .iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                price: Some(line.unit_price),
            })
            .collect();
        let order = Order {
            id: order_id,
            user_id: new_order.user_id,
            total_price: items_total(&items).ok_or(StoreError::AmountOverflow)?,
            status: OrderStatus::Pending,
            stock_status: StockStatus::Pending,
            created_at: now,
            updated_at: now,
            items,
        };

        self.write().orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.read().orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        let table = self.read();
        let mut orders: Vec<Order> = table
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut table = self.write();
        let Some(order) = table.orders.get_mut(&order_id) else {
            return Ok(None);
        };

        if !order.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                order_id,
                from: order.status,
                to: status,
            });
        }
        order.status = status;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn set_stock_status(
        &self,
        order_id: Uuid,
        stock_status: StockStatus,
    ) -> Result<(), StoreError> {
        let mut table = self.write();
        let order = table
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.stock_status = stock_status;
        order.updated_at = Utc::now();
        Ok(())
    }
}
