use tracing::{Instrument, info, instrument};
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, CartLine, CartView},
    error::OrderError,
    models::{Order, OrderItem, PricedLine, line_amount, lines_total},
    services::{ensure_user, fetch_product, require_user_id, run_to_completion, settle_stock},
    state::AppState,
};

fn amount_overflow() -> OrderError {
    OrderError::InvalidInput("cart total exceeds the supported amount range".into())
}

/// Adds `quantity` of a product to the user's cart, merging with an existing
/// line. For stock-tracked products the store rejects a merged quantity above
/// the current stock in the same step that writes it.
#[instrument(skip(state, input), fields(user_id = %input.user_id, product_id = input.product_id))]
pub async fn add_to_cart(state: &AppState, input: AddToCartRequest) -> Result<OrderItem, OrderError> {
    require_user_id(&input.user_id)?;
    if input.quantity <= 0 {
        return Err(OrderError::InvalidInput("quantity must be positive".into()));
    }

    ensure_user(state, &input.user_id).await?;
    let product = fetch_product(state, input.product_id).await?;
    let cart = state.store.get_or_create_cart(&input.user_id).await?;

    let limit = product.tracks_stock().then_some(product.stock);
    let item = state
        .store
        .add_item(cart.id, input.product_id, input.quantity, limit)
        .await?;
    info!(order_id = %cart.id, quantity = item.quantity, "cart line updated");
    Ok(item)
}

pub async fn remove_from_cart(
    state: &AppState,
    user_id: &str,
    product_id: i64,
) -> Result<(), OrderError> {
    require_user_id(user_id)?;
    let cart = state.store.get_or_create_cart(user_id).await?;
    state.store.remove_item(cart.id, product_id).await?;
    info!(order_id = %cart.id, user_id, product_id, "cart line removed");
    Ok(())
}

/// The user's cart with every line priced from the catalog as of now.
pub async fn get_cart(state: &AppState, user_id: &str) -> Result<CartView, OrderError> {
    require_user_id(user_id)?;
    let cart = state.store.get_or_create_cart(user_id).await?;

    let mut items = Vec::with_capacity(cart.items.len());
    let mut total_price = 0i64;
    for item in &cart.items {
        let product = fetch_product(state, item.product_id).await?;
        let line_total = line_amount(product.price, item.quantity).ok_or_else(amount_overflow)?;
        total_price = total_price
            .checked_add(line_total)
            .ok_or_else(amount_overflow)?;
        items.push(CartLine {
            id: item.id,
            product_id: item.product_id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: product.price,
            line_total,
        });
    }

    Ok(CartView {
        id: cart.id,
        user_id: cart.user_id,
        status: cart.status,
        total_price,
        items,
        created_at: cart.created_at,
        updated_at: cart.updated_at,
    })
}

/// A cart priced against the catalog and ready to commit.
#[derive(Debug, Clone)]
pub struct PreparedCheckout {
    cart_id: Uuid,
    lines: Vec<PricedLine>,
    // (product id, quantity) of lines whose stock the catalog tracks
    tracked: Vec<(i64, i32)>,
}

/// Confirms the user and prices every cart line, re-checking stock. Makes no
/// writes beyond creating the cart on first access.
#[instrument(skip(state))]
pub async fn prepare_checkout(
    state: &AppState,
    user_id: &str,
) -> Result<PreparedCheckout, OrderError> {
    require_user_id(user_id)?;
    ensure_user(state, user_id).await?;
    let cart = state.store.get_or_create_cart(user_id).await?;

    let mut lines = Vec::with_capacity(cart.items.len());
    let mut tracked = Vec::new();
    for item in &cart.items {
        let product = fetch_product(state, item.product_id).await?;
        if !product.can_supply(item.quantity) {
            return Err(OrderError::InsufficientStock {
                product_id: item.product_id,
                available: product.stock,
                requested: item.quantity,
            });
        }
        if product.tracks_stock() {
            tracked.push((item.product_id, item.quantity));
        }
        lines.push(PricedLine {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: product.price,
        });
    }
    if lines_total(&lines).is_none() {
        return Err(amount_overflow());
    }

    Ok(PreparedCheckout {
        cart_id: cart.id,
        lines,
        tracked,
    })
}

/// Commits a prepared cart, then decrements stock. The store refuses the
/// commit if the cart changed since it was priced. Once called it runs to the
/// end even if the caller stops waiting.
pub async fn complete_checkout(
    state: &AppState,
    prepared: PreparedCheckout,
) -> Result<Order, OrderError> {
    let state = state.clone();
    run_to_completion(
        async move {
            let order = state
                .store
                .checkout(prepared.cart_id, &prepared.lines)
                .await?;
            info!(order_id = %order.id, total_price = order.total_price, "cart checked out");

            Ok(settle_stock(&state, order, &prepared.tracked).await)
        }
        .in_current_span(),
    )
    .await
}

pub async fn checkout(state: &AppState, user_id: &str) -> Result<Order, OrderError> {
    let prepared = prepare_checkout(state, user_id).await?;
    complete_checkout(state, prepared).await
}

pub async fn completed_orders(state: &AppState, user_id: &str) -> Result<Vec<Order>, OrderError> {
    require_user_id(user_id)?;
    Ok(state.store.list_completed(user_id).await?)
}
