//! Use cases on top of the order store and the two collaborators.

use std::future::Future;

use tracing::warn;

use crate::{
    clients::{CollaboratorError, ProductInfo, UserInfo, with_deadline},
    error::OrderError,
    models::{Order, StockStatus},
    state::AppState,
};

pub mod cart_service;
pub mod order_service;

pub(crate) fn require_user_id(user_id: &str) -> Result<(), OrderError> {
    if user_id.trim().is_empty() {
        return Err(OrderError::InvalidInput("user_id must not be empty".into()));
    }
    Ok(())
}

pub(crate) async fn ensure_user(state: &AppState, user_id: &str) -> Result<UserInfo, OrderError> {
    with_deadline(state.upstream_timeout, state.users.get_user(user_id))
        .await
        .map_err(|err| match err {
            CollaboratorError::NotFound => OrderError::UserNotFound(user_id.to_string()),
            other => OrderError::UpstreamUnavailable {
                resource: "user",
                id: user_id.to_string(),
                reason: other.to_string(),
            },
        })
}

pub(crate) async fn fetch_product(
    state: &AppState,
    product_id: i64,
) -> Result<ProductInfo, OrderError> {
    with_deadline(state.upstream_timeout, state.products.get_product(product_id))
        .await
        .map_err(|err| match err {
            CollaboratorError::NotFound => OrderError::ProductNotFound(product_id),
            other => OrderError::UpstreamUnavailable {
                resource: "product",
                id: product_id.to_string(),
                reason: other.to_string(),
            },
        })
}

/// Applies the catalog stock decrement for a committed order and records the
/// outcome on it. The order itself stays committed whatever happens here.
pub(crate) async fn settle_stock(
    state: &AppState,
    mut order: Order,
    tracked: &[(i64, i32)],
) -> Order {
    let mut outcome = StockStatus::Applied;
    for &(product_id, quantity) in tracked {
        let call = state.products.decrease_stock(product_id, quantity);
        if let Err(err) = with_deadline(state.upstream_timeout, call).await {
            warn!(order_id = %order.id, product_id, error = %err, "stock decrement failed");
            outcome = StockStatus::Failed;
            break;
        }
    }

    match state.store.set_stock_status(order.id, outcome).await {
        Ok(()) => order.stock_status = outcome,
        Err(err) => {
            warn!(order_id = %order.id, error = %err, "could not record stock status");
        }
    }
    order
}

/// Runs committing work on its own task. Dropping the caller's future does
/// not stop it, so a started commit always finishes and records its stock
/// outcome.
pub(crate) async fn run_to_completion<T, F>(work: F) -> Result<T, OrderError>
where
    F: Future<Output = Result<T, OrderError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|err| OrderError::Interrupted(err.to_string()))?
}
