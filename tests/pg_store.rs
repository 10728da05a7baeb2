use std::sync::Arc;

use order_service::{
    db::{create_pool, orm_from_pool, run_migrations},
    models::{NewOrder, OrderStatus, PricedLine, StockStatus},
    store::{OrderStore, PgOrderStore, StoreError},
};
use uuid::Uuid;

// Allow skipping when no DB is configured in the environment.
async fn setup_store() -> anyhow::Result<Option<PgOrderStore>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run postgres store tests.");
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    run_migrations(&orm_from_pool(pool.clone()), "./migrations").await?;
    Ok(Some(PgOrderStore::new(pool)))
}

fn unique_user() -> String {
    format!("pg-test-{}", Uuid::new_v4())
}

#[tokio::test]
async fn create_order_round_trip_and_status_flow() -> anyhow::Result<()> {
    let Some(store) = setup_store().await? else {
        return Ok(());
    };
    let user = unique_user();

    let order = store
        .create_order(NewOrder {
            user_id: user.clone(),
            lines: vec![
                PricedLine { product_id: 3, quantity: 2, unit_price: 1000 },
                PricedLine { product_id: 1, quantity: 1, unit_price: 250 },
            ],
        })
        .await?;
    assert_eq!(order.total_price, 2250);
    assert_eq!(order.status, OrderStatus::Pending);

    let loaded = store.get_order(order.id).await?.expect("order persisted");
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].product_id, 3);
    assert_eq!(loaded.items[1].price, Some(250));

    store.set_stock_status(order.id, StockStatus::Applied).await?;
    let paid = store
        .update_status(order.id, OrderStatus::Paid)
        .await?
        .expect("order exists");
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.stock_status, StockStatus::Applied);
    assert_eq!(paid.items.len(), 2);

    let backwards = store.update_status(order.id, OrderStatus::Pending).await;
    assert!(matches!(backwards, Err(StoreError::InvalidTransition { .. })));

    assert!(store.get_order(Uuid::new_v4()).await?.is_none());
    assert!(store.update_status(Uuid::new_v4(), OrderStatus::Paid).await?.is_none());
    assert_eq!(store.list_orders_for_user(&user).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cart_lifecycle_on_postgres() -> anyhow::Result<()> {
    let Some(store) = setup_store().await? else {
        return Ok(());
    };
    let store = Arc::new(store);
    let user = unique_user();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let user = user.clone();
        handles.push(tokio::spawn(async move { store.get_or_create_cart(&user).await }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await??.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    let cart_id = ids[0];

    store.add_item(cart_id, 7, 2, None).await?;
    let merged = store.add_item(cart_id, 7, 3, None).await?;
    store.add_item(cart_id, 9, 1, None).await?;
    assert_eq!(merged.quantity, 5);
    let items = store.list_items(cart_id).await?;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].product_id, 7);

    store.remove_item(cart_id, 9).await?;
    assert!(matches!(
        store.remove_item(cart_id, 9).await,
        Err(StoreError::ItemNotFound { .. })
    ));

    let stale = [PricedLine { product_id: 7, quantity: 4, unit_price: 100 }];
    assert!(matches!(
        store.checkout(cart_id, &stale).await,
        Err(StoreError::CartChanged(_))
    ));

    let lines = [PricedLine { product_id: 7, quantity: 5, unit_price: 100 }];
    let order = store.checkout(cart_id, &lines).await?;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_price, 500);
    assert_eq!(order.items[0].price, Some(100));

    assert!(matches!(
        store.add_item(cart_id, 7, 1, None).await,
        Err(StoreError::NotCart(_))
    ));
    let completed = store.list_completed(&user).await?;
    assert_eq!(completed.len(), 1);
    assert_ne!(store.get_or_create_cart(&user).await?.id, cart_id);
    Ok(())
}

#[tokio::test]
async fn empty_cart_checkout_is_refused() -> anyhow::Result<()> {
    let Some(store) = setup_store().await? else {
        return Ok(());
    };
    let cart = store.get_or_create_cart(&unique_user()).await?;

    assert!(matches!(
        store.checkout(cart.id, &[]).await,
        Err(StoreError::EmptyCart(_))
    ));
    let reloaded = store.get_order(cart.id).await?.expect("cart exists");
    assert_eq!(reloaded.status, OrderStatus::Cart);
    Ok(())
}

#[tokio::test]
async fn failed_item_insert_rolls_back_the_order_row() -> anyhow::Result<()> {
    let Some(store) = setup_store().await? else {
        return Ok(());
    };
    let user = unique_user();
    let line = PricedLine { product_id: 1, quantity: 1, unit_price: 100 };

    // The second insert breaks UNIQUE (order_id, product_id).
    let result = store
        .create_order(NewOrder {
            user_id: user.clone(),
            lines: vec![line.clone(), line],
        })
        .await;

    assert!(matches!(result, Err(StoreError::Orm(_))));
    assert!(store.list_orders_for_user(&user).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cart_line_limit_is_enforced_on_postgres() -> anyhow::Result<()> {
    let Some(store) = setup_store().await? else {
        return Ok(());
    };
    let cart = store.get_or_create_cart(&unique_user()).await?;

    store.add_item(cart.id, 7, 3, Some(5)).await?;
    let over = store.add_item(cart.id, 7, 3, Some(5)).await;

    assert!(matches!(
        over,
        Err(StoreError::QuantityLimit { product_id: 7, limit: 5, requested: 6 })
    ));
    assert_eq!(store.list_items(cart.id).await?[0].quantity, 3);
    Ok(())
}
