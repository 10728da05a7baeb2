use tracing::{Instrument, info, instrument};
use uuid::Uuid;

use crate::{
    dto::orders::CreateOrderRequest,
    error::OrderError,
    models::{NewOrder, Order, OrderStatus, PricedLine},
    services::{ensure_user, fetch_product, require_user_id, run_to_completion, settle_stock},
    state::AppState,
};

/// Checks the request shape and folds repeated product ids into one line,
/// keeping first-seen order.
fn validate_create(input: &CreateOrderRequest) -> Result<Vec<(i64, i32)>, OrderError> {
    require_user_id(&input.user_id)?;
    if input.items.is_empty() {
        return Err(OrderError::InvalidInput(
            "order must contain at least one item".into(),
        ));
    }

    let mut lines: Vec<(i64, i32)> = Vec::with_capacity(input.items.len());
    for item in &input.items {
        if item.quantity <= 0 {
            return Err(OrderError::InvalidInput(format!(
                "quantity for product {} must be positive",
                item.product_id
            )));
        }
        match lines.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, quantity)) => {
                *quantity = quantity.checked_add(item.quantity).ok_or_else(|| {
                    OrderError::InvalidInput(format!(
                        "quantity for product {} is too large",
                        item.product_id
                    ))
                })?;
            }
            None => lines.push((item.product_id, item.quantity)),
        }
    }
    Ok(lines)
}

/// A validated order priced against the catalog. Nothing has been written
/// yet, so it can be discarded freely.
#[derive(Debug, Clone)]
pub struct PreparedOrder {
    order: NewOrder,
    // (product id, quantity) of lines whose stock the catalog tracks
    tracked: Vec<(i64, i32)>,
}

/// Validates, confirms the user and prices every line. Makes no writes.
#[instrument(skip(state, input), fields(user_id = %input.user_id))]
pub async fn prepare_order(
    state: &AppState,
    input: CreateOrderRequest,
) -> Result<PreparedOrder, OrderError> {
    let requested = validate_create(&input)?;
    ensure_user(state, &input.user_id).await?;

    let mut lines = Vec::with_capacity(requested.len());
    let mut tracked = Vec::new();
    for (product_id, quantity) in requested {
        let product = fetch_product(state, product_id).await?;
        if !product.can_supply(quantity) {
            return Err(OrderError::InsufficientStock {
                product_id,
                available: product.stock,
                requested: quantity,
            });
        }
        if product.tracks_stock() {
            tracked.push((product_id, quantity));
        }
        lines.push(PricedLine {
            product_id,
            quantity,
            unit_price: product.price,
        });
    }

    let order = NewOrder {
        user_id: input.user_id,
        lines,
    };
    if order.total_price().is_none() {
        return Err(OrderError::InvalidInput(
            "order total exceeds the supported amount range".into(),
        ));
    }
    Ok(PreparedOrder { order, tracked })
}

/// Persists a prepared order in one atomic step, then decrements stock.
/// Once called it runs to the end even if the caller stops waiting.
pub async fn place_order(state: &AppState, prepared: PreparedOrder) -> Result<Order, OrderError> {
    let state = state.clone();
    run_to_completion(
        async move {
            let order = state
                .store
                .create_order(prepared.order)
                .await
                .map_err(OrderError::CreateOrderFailed)?;
            info!(order_id = %order.id, total_price = order.total_price, "order created");

            Ok(settle_stock(&state, order, &prepared.tracked).await)
        }
        .in_current_span(),
    )
    .await
}

pub async fn create_order(state: &AppState, input: CreateOrderRequest) -> Result<Order, OrderError> {
    let prepared = prepare_order(state, input).await?;
    place_order(state, prepared).await
}

pub async fn get_order(state: &AppState, order_id: Uuid) -> Result<Order, OrderError> {
    state
        .store
        .get_order(order_id)
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))
}

pub async fn list_orders_for_user(state: &AppState, user_id: &str) -> Result<Vec<Order>, OrderError> {
    require_user_id(user_id)?;
    Ok(state.store.list_orders_for_user(user_id).await?)
}

#[instrument(skip(state))]
pub async fn update_status(
    state: &AppState,
    order_id: Uuid,
    status: OrderStatus,
) -> Result<Order, OrderError> {
    if status == OrderStatus::Cart {
        return Err(OrderError::InvalidInput(
            "an order cannot be moved back to CART".into(),
        ));
    }
    let order = state
        .store
        .update_status(order_id, status)
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))?;
    info!(order_id = %order.id, status = %order.status, "order status updated");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        clients::{
            CollaboratorError, FixedCatalog, FixedUsers, ProductCollaborator, ProductInfo,
            ProductType, UserCollaborator, UserInfo,
        },
        dto::orders::CreateOrderItem,
        error::ErrorKind,
        models::StockStatus,
        store::{MemoryOrderStore, SharedStore},
    };

    fn product(id: i64, price: i64, stock: i32) -> ProductInfo {
        ProductInfo {
            id,
            name: format!("Product {id}"),
            price,
            stock,
            product_type: ProductType::Merchandise,
        }
    }

    fn request(user_id: &str, items: &[(i64, i32)]) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: user_id.to_string(),
            items: items
                .iter()
                .map(|&(product_id, quantity)| CreateOrderItem {
                    product_id,
                    quantity,
                })
                .collect(),
        }
    }

    struct Harness {
        state: AppState,
        store: SharedStore,
        users: Arc<FixedUsers>,
        catalog: Arc<FixedCatalog>,
    }

    fn harness(users: FixedUsers, catalog: FixedCatalog) -> Harness {
        let store: SharedStore = Arc::new(MemoryOrderStore::new());
        let users = Arc::new(users);
        let catalog = Arc::new(catalog);
        let state = AppState::new(store.clone(), users.clone(), catalog.clone());
        Harness {
            state,
            store,
            users,
            catalog,
        }
    }

    #[tokio::test]
    async fn total_is_sum_of_catalog_prices() {
        let h = harness(
            FixedUsers::new(["u1"]),
            FixedCatalog::new([product(1, 1000, 10), product(2, 250, -1)]),
        );

        let order = create_order(&h.state, request("u1", &[(1, 2), (2, 4)]))
            .await
            .unwrap();

        assert_eq!(order.total_price, 2 * 1000 + 4 * 250);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].price, Some(1000));
        assert_eq!(order.items[1].price, Some(250));

        let stored = get_order(&h.state, order.id).await.unwrap();
        assert_eq!(stored.total_price, order.total_price);
        assert_eq!(stored.items, order.items);
    }

    #[tokio::test]
    async fn stock_is_decremented_after_commit() {
        let h = harness(
            FixedUsers::new(["u1"]),
            FixedCatalog::new([product(1, 500, 10)]),
        );

        let order = create_order(&h.state, request("u1", &[(1, 3)])).await.unwrap();

        assert_eq!(order.stock_status, StockStatus::Applied);
        assert_eq!(h.catalog.stock(1), Some(7));
        let stored = get_order(&h.state, order.id).await.unwrap();
        assert_eq!(stored.stock_status, StockStatus::Applied);
    }

    #[tokio::test]
    async fn failed_stock_decrement_keeps_order_and_is_recorded() {
        let h = harness(
            FixedUsers::new(["u1"]),
            FixedCatalog::new([product(1, 500, 10)]),
        );
        h.catalog.fail_stock_updates(1);

        let order = create_order(&h.state, request("u1", &[(1, 1)])).await.unwrap();

        assert_eq!(order.stock_status, StockStatus::Failed);
        let stored = get_order(&h.state, order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.stock_status, StockStatus::Failed);
    }

    #[tokio::test]
    async fn tickets_skip_stock_check_and_decrement() {
        let ticket = ProductInfo {
            product_type: ProductType::Ticket,
            ..product(3, 10_000, 0)
        };
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::new([ticket]));

        let order = create_order(&h.state, request("u1", &[(3, 2)])).await.unwrap();

        assert_eq!(order.total_price, 20_000);
        assert_eq!(order.stock_status, StockStatus::Applied);
        assert_eq!(h.catalog.stock(3), Some(0));
    }

    #[tokio::test]
    async fn insufficient_stock_persists_nothing() {
        let h = harness(
            FixedUsers::new(["u1"]),
            FixedCatalog::new([product(1, 1000, 10), product(2, 100, 1)]),
        );

        let err = create_order(&h.state, request("u1", &[(1, 1), (2, 5)]))
            .await
            .unwrap_err();

        match err {
            OrderError::InsufficientStock {
                product_id,
                available,
                requested,
            } => {
                assert_eq!((product_id, available, requested), (2, 1, 5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.store.list_orders_for_user("u1").await.unwrap().is_empty());
        assert_eq!(h.catalog.stock(1), Some(10));
    }

    #[tokio::test]
    async fn empty_items_make_no_collaborator_calls() {
        let h = harness(FixedUsers::allow_all(), FixedCatalog::any_product(100, 10));

        let err = create_order(&h.state, request("u1", &[])).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(h.users.calls(), 0);
        assert_eq!(h.catalog.lookups(), 0);
    }

    #[tokio::test]
    async fn invalid_quantity_or_user_is_rejected_before_lookups() {
        let h = harness(FixedUsers::allow_all(), FixedCatalog::any_product(100, 10));

        let zero = create_order(&h.state, request("u1", &[(1, 0)])).await.unwrap_err();
        let blank = create_order(&h.state, request("  ", &[(1, 1)])).await.unwrap_err();

        assert_eq!(zero.kind(), ErrorKind::InvalidInput);
        assert_eq!(blank.kind(), ErrorKind::InvalidInput);
        assert_eq!(h.users.calls(), 0);
    }

    #[tokio::test]
    async fn repeated_product_ids_are_merged() {
        let h = harness(
            FixedUsers::new(["u1"]),
            FixedCatalog::new([product(1, 100, 5), product(2, 10, 5)]),
        );

        let order = create_order(&h.state, request("u1", &[(1, 2), (2, 1), (1, 3)]))
            .await
            .unwrap();

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].product_id, 1);
        assert_eq!(order.items[0].quantity, 5);
        assert_eq!(order.total_price, 510);
    }

    #[tokio::test]
    async fn merged_quantity_is_checked_against_stock() {
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::new([product(1, 100, 4)]));

        let err = create_order(&h.state, request("u1", &[(1, 2), (1, 3)]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::any_product(100, 10));

        let err = create_order(&h.state, request("u2", &[(1, 1)])).await.unwrap_err();

        assert!(matches!(err, OrderError::UserNotFound(ref id) if id == "u2"));
        assert_eq!(h.catalog.lookups(), 0);
    }

    #[tokio::test]
    async fn unreachable_user_service_is_upstream_unavailable() {
        let h = harness(FixedUsers::unreachable(), FixedCatalog::any_product(100, 10));

        let err = create_order(&h.state, request("u1", &[(1, 1)])).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(matches!(
            err,
            OrderError::UpstreamUnavailable { resource: "user", .. }
        ));
    }

    #[tokio::test]
    async fn second_product_failure_leaves_no_rows() {
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::new([product(1, 100, 5)]));
        h.catalog.set_unavailable(2);

        let err = create_order(&h.state, request("u1", &[(1, 1), (2, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderError::UpstreamUnavailable { resource: "product", ref id, .. } if id == "2"
        ));
        assert!(h.store.list_orders_for_user("u1").await.unwrap().is_empty());

        let missing = create_order(&h.state, request("u1", &[(1, 1), (9, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(missing, OrderError::ProductNotFound(9)));
        assert!(h.store.list_orders_for_user("u1").await.unwrap().is_empty());
    }

    struct SlowUsers(Duration);

    #[async_trait]
    impl UserCollaborator for SlowUsers {
        async fn get_user(&self, user_id: &str) -> Result<UserInfo, CollaboratorError> {
            tokio::time::sleep(self.0).await;
            Ok(UserInfo {
                id: user_id.to_string(),
                username: String::new(),
                email: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn slow_collaborator_hits_upstream_deadline() {
        let store: SharedStore = Arc::new(MemoryOrderStore::new());
        let state = AppState::new(
            store.clone(),
            Arc::new(SlowUsers(Duration::from_millis(200))),
            Arc::new(FixedCatalog::any_product(100, 10)),
        )
        .with_timeouts(Duration::from_millis(10), Duration::from_secs(5));

        let err = create_order(&state, request("u1", &[(1, 1)])).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(store.list_orders_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_request_persists_nothing() {
        let store: SharedStore = Arc::new(MemoryOrderStore::new());
        let state = AppState::new(
            store.clone(),
            Arc::new(SlowUsers(Duration::from_millis(200))),
            Arc::new(FixedCatalog::any_product(100, 10)),
        );

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            create_order(&state, request("u1", &[(1, 1)])),
        )
        .await;

        assert!(outcome.is_err());
        assert!(store.list_orders_for_user("u1").await.unwrap().is_empty());
    }

    struct SlowStock {
        catalog: FixedCatalog,
        delay: Duration,
    }

    #[async_trait]
    impl ProductCollaborator for SlowStock {
        async fn get_product(&self, product_id: i64) -> Result<ProductInfo, CollaboratorError> {
            self.catalog.get_product(product_id).await
        }

        async fn decrease_stock(
            &self,
            product_id: i64,
            quantity: i32,
        ) -> Result<(), CollaboratorError> {
            tokio::time::sleep(self.delay).await;
            self.catalog.decrease_stock(product_id, quantity).await
        }
    }

    #[tokio::test]
    async fn commit_and_stock_outcome_survive_an_abandoned_caller() {
        let store: SharedStore = Arc::new(MemoryOrderStore::new());
        let products = Arc::new(SlowStock {
            catalog: FixedCatalog::new([product(1, 100, 5)]),
            delay: Duration::from_millis(100),
        });
        let state = AppState::new(
            store.clone(),
            Arc::new(FixedUsers::new(["u1"])),
            products.clone(),
        );

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            create_order(&state, request("u1", &[(1, 2)])),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let orders = store.list_orders_for_user("u1").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].stock_status, StockStatus::Applied);
        assert_eq!(products.catalog.stock(1), Some(3));
    }

    #[tokio::test]
    async fn overflowing_total_is_invalid_input() {
        let h = harness(
            FixedUsers::new(["u1"]),
            FixedCatalog::new([product(1, i64::MAX / 2, -1)]),
        );

        let err = create_order(&h.state, request("u1", &[(1, 3)])).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(h.store.list_orders_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_a_user_without_orders_is_empty() {
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::any_product(100, 10));

        let orders = list_orders_for_user(&h.state, "nobody").await.unwrap();

        assert!(orders.is_empty());
        assert_eq!(h.users.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::any_product(100, 10));
        let id = Uuid::new_v4();

        assert!(matches!(
            get_order(&h.state, id).await,
            Err(OrderError::OrderNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            update_status(&h.state, id, OrderStatus::Paid).await,
            Err(OrderError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_moves_forward_and_rereads_aggregate() {
        let h = harness(FixedUsers::new(["u1"]), FixedCatalog::new([product(1, 100, 5)]));
        let order = create_order(&h.state, request("u1", &[(1, 1)])).await.unwrap();

        let paid = update_status(&h.state, order.id, OrderStatus::Paid).await.unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.items, order.items);

        let back = update_status(&h.state, order.id, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert_eq!(back.kind(), ErrorKind::Conflict);

        let cart = update_status(&h.state, order.id, OrderStatus::Cart)
            .await
            .unwrap_err();
        assert_eq!(cart.kind(), ErrorKind::InvalidInput);
    }
}
