use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sqlx::FromRow;
use uuid::Uuid;

use super::{OrderStore, StoreError, matches_cart};
use crate::{
    db::{DbPool, OrmConn, orm_from_pool},
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    models::{NewOrder, Order, OrderItem, OrderStatus, PricedLine, StockStatus, lines_total},
};

// A concurrent checkout can retire the cart between the insert and the read.
const CART_ATTEMPTS: usize = 3;

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    total_price: i64,
    status: String,
    stock_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: i64,
    quantity: i32,
    price: Option<i64>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            price: row.price,
        }
    }
}

/// PostgreSQL backend. Cart mutations are single upserts/deletes issued with
/// sqlx under a row lock on the order; committed-order operations go through
/// SeaORM transactions.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
    orm: OrmConn,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        let orm = orm_from_pool(pool.clone());
        Self { pool, orm }
    }

    async fn cart_row(&self, user_id: &str) -> Result<Option<OrderRow>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, total_price, status, stock_status, created_at, updated_at
            FROM orders
            WHERE user_id = $1 AND status = 'CART'
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn lock_cart(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_id: Uuid,
    ) -> Result<(), StoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut **tx)
                .await?;
        match status {
            None => Err(StoreError::OrderNotFound(order_id)),
            Some((status,)) if status != OrderStatus::Cart.as_str() => {
                Err(StoreError::NotCart(order_id))
            }
            Some(_) => Ok(()),
        }
    }

    async fn list_with_items(&self, condition: Condition) -> Result<Vec<Order>, StoreError> {
        let orders = Orders::find()
            .filter(condition)
            .order_by_desc(OrderCol::CreatedAt)
            .all(&self.orm)
            .await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in OrderItems::find()
            .filter(OrderItemCol::OrderId.is_in(ids))
            .order_by_asc(OrderItemCol::Position)
            .all(&self.orm)
            .await?
        {
            items_by_order
                .entry(item.order_id)
                .or_default()
                .push(order_item_from_entity(item));
        }

        orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                order_from_entity(order, items)
            })
            .collect()
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_or_create_cart(&self, user_id: &str) -> Result<Order, StoreError> {
        for _ in 0..CART_ATTEMPTS {
            // The partial unique index makes a concurrent second insert a no-op.
            sqlx::query(
                r#"
                INSERT INTO orders (id, user_id, total_price, status, stock_status)
                VALUES ($1, $2, 0, 'CART', 'PENDING')
                ON CONFLICT (user_id) WHERE status = 'CART' DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

            if let Some(row) = self.cart_row(user_id).await? {
                let items = load_items(&self.orm, row.id).await?;
                return order_from_row(row, items);
            }
        }

        Err(StoreError::CartUnavailable(user_id.to_string()))
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

        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, order_id).await?;

        // The cart row lock keeps this read valid until commit.
        let current: Option<(i32,)> = sqlx::query_as(
            "SELECT quantity FROM order_items WHERE order_id = $1 AND product_id = $2",
        )
        .bind(order_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;
        let merged = match current {
            Some((existing,)) => existing
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

        let row = sqlx::query_as::<_, OrderItemRow>(
            r#"
            INSERT INTO order_items (id, order_id, product_id, quantity, price, position)
            VALUES (
                $1, $2, $3, $4, NULL,
                (SELECT COALESCE(MAX(position) + 1, 0) FROM order_items WHERE order_id = $2)
            )
            ON CONFLICT (order_id, product_id)
            DO UPDATE SET quantity = order_items.quantity + EXCLUDED.quantity
            RETURNING id, order_id, product_id, quantity, price
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE orders SET updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn remove_item(&self, order_id: Uuid, product_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, order_id).await?;

        let result = sqlx::query("DELETE FROM order_items WHERE order_id = $1 AND product_id = $2")
            .bind(order_id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ItemNotFound {
                order_id,
                product_id,
            });
        }

        sqlx::query("UPDATE orders SET updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        if Orders::find_by_id(order_id).one(&self.orm).await?.is_none() {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(load_items(&self.orm, order_id).await?)
    }

    async fn checkout(&self, order_id: Uuid, lines: &[PricedLine]) -> Result<Order, StoreError> {
        let txn = self.orm.begin().await?;

        let order = Orders::find_by_id(order_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Cart.as_str() {
            return Err(StoreError::NotCart(order_id));
        }

        let models = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order_id))
            .order_by_asc(OrderItemCol::Position)
            .all(&txn)
            .await?;
        if models.is_empty() {
            return Err(StoreError::EmptyCart(order_id));
        }
        let current: Vec<OrderItem> = models.iter().cloned().map(order_item_from_entity).collect();
        if !matches_cart(&current, lines) {
            return Err(StoreError::CartChanged(order_id));
        }
        let total_price = lines_total(lines).ok_or(StoreError::AmountOverflow)?;

        let mut items = Vec::with_capacity(models.len());
        for model in models {
            let price = lines
                .iter()
                .find(|line| line.product_id == model.product_id)
                .map(|line| line.unit_price);
            let mut active: OrderItemActive = model.into();
            active.price = Set(price);
            items.push(order_item_from_entity(active.update(&txn).await?));
        }

        let mut active: OrderActive = order.into();
        active.status = Set(OrderStatus::Pending.as_str().to_string());
        active.total_price = Set(total_price);
        active.updated_at = Set(Utc::now().into());
        let order = active.update(&txn).await?;

        txn.commit().await?;
        order_from_entity(order, items)
    }

    async fn list_completed(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        self.list_with_items(
            Condition::all()
                .add(OrderCol::UserId.eq(user_id))
                .add(OrderCol::Status.ne(OrderStatus::Cart.as_str())),
        )
        .await
    }

    async fn create_order(&self, new_order: NewOrder) -> Result<Order, StoreError> {
        if let Some(line) = new_order.lines.iter().find(|line| line.quantity <= 0) {
            return Err(StoreError::InvalidQuantity(line.quantity));
        }

        let total_price = new_order
            .total_price()
            .ok_or(StoreError::AmountOverflow)?;

        let txn = self.orm.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order = OrderActive {
            id: Set(order_id),
            user_id: Set(new_order.user_id.clone()),
            total_price: Set(total_price),
            status: Set(OrderStatus::Pending.as_str().to_string()),
            stock_status: Set(StockStatus::Pending.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(new_order.lines.len());
        for (position, line) in new_order.lines.iter().enumerate() {
            let item = OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price: Set(Some(line.unit_price)),
                position: Set(position as i32),
            }
            .insert(&txn)
            .await?;
            items.push(order_item_from_entity(item));
        }

        // Dropping `txn` on any early return above rolls the whole insert back.
        txn.commit().await?;
        order_from_entity(order, items)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let Some(order) = Orders::find_by_id(order_id).one(&self.orm).await? else {
            return Ok(None);
        };
        let items = load_items(&self.orm, order.id).await?;
        order_from_entity(order, items).map(Some)
    }

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        self.list_with_items(Condition::all().add(OrderCol::UserId.eq(user_id)))
            .await
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let txn = self.orm.begin().await?;

        let Some(order) = Orders::find_by_id(order_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        let current = parse_status(&order.status)?;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                order_id,
                from: current,
                to: status,
            });
        }

        let mut active: OrderActive = order.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now().into());
        let order = active.update(&txn).await?;
        let items = load_items(&txn, order.id).await?;

        txn.commit().await?;
        order_from_entity(order, items).map(Some)
    }

    async fn set_stock_status(
        &self,
        order_id: Uuid,
        stock_status: StockStatus,
    ) -> Result<(), StoreError> {
        let result = Orders::update_many()
            .col_expr(OrderCol::StockStatus, Expr::value(stock_status.as_str()))
            .col_expr(
                OrderCol::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(OrderCol::Id.eq(order_id))
            .exec(&self.orm)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }
}

async fn load_items<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<Vec<OrderItem>, DbErr> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::Position)
        .all(conn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect())
}

fn parse_status(raw: &str) -> Result<OrderStatus, StoreError> {
    raw.parse()
        .map_err(|err: crate::models::UnknownStatus| StoreError::Corrupt(err.to_string()))
}

fn parse_stock_status(raw: &str) -> Result<StockStatus, StoreError> {
    raw.parse()
        .map_err(|err: crate::models::UnknownStatus| StoreError::Corrupt(err.to_string()))
}

fn order_from_entity(model: OrderModel, items: Vec<OrderItem>) -> Result<Order, StoreError> {
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        total_price: model.total_price,
        status: parse_status(&model.status)?,
        stock_status: parse_stock_status(&model.stock_status)?,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
        items,
    })
}

fn order_from_row(row: OrderRow, items: Vec<OrderItem>) -> Result<Order, StoreError> {
    Ok(Order {
        id: row.id,
        user_id: row.user_id,
        total_price: row.total_price,
        status: parse_status(&row.status)?,
        stock_status: parse_stock_status(&row.stock_status)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
        items,
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
    }
}
