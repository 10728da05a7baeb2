use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartView},
        orders::OrderList,
    },
    error::AppResult,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::within_deadline,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(add_to_cart))
        .route("/{user_id}", get(get_cart))
        .route("/{user_id}/checkout", post(checkout))
        .route("/{user_id}/completed", get(completed_orders))
        .route("/{user_id}/{product_id}", delete(remove_from_cart))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Add or merge a cart line", body = ApiResponse<OrderItem>),
        (status = 400, description = "Bad request"),
        (status = 409, description = "Insufficient stock"),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<OrderItem>>> {
    let item = within_deadline(&state, cart_service::add_to_cart(&state, payload)).await?;
    Ok(Json(ApiResponse::success("Added to cart", item, None)))
}

#[utoipa::path(
    delete,
    path = "/api/cart/{user_id}/{product_id}",
    params(
        ("user_id" = String, Path, description = "Cart owner"),
        ("product_id" = i64, Path, description = "Product to remove"),
    ),
    responses(
        (status = 200, description = "Line removed"),
        (status = 404, description = "Product not in cart"),
    ),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(String, i64)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    within_deadline(
        &state,
        cart_service::remove_from_cart(&state, &user_id, product_id),
    )
    .await?;
    Ok(Json(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({ "product_id": product_id }),
        None,
    )))
}

#[utoipa::path(
    get,
    path = "/api/cart/{user_id}",
    params(("user_id" = String, Path, description = "Cart owner")),
    responses(
        (status = 200, description = "Cart priced from the catalog", body = ApiResponse<CartView>),
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<ApiResponse<CartView>>> {
    let cart = within_deadline(&state, cart_service::get_cart(&state, &user_id)).await?;
    Ok(Json(ApiResponse::success("Ok", cart, None)))
}

#[utoipa::path(
    post,
    path = "/api/cart/{user_id}/checkout",
    params(("user_id" = String, Path, description = "Cart owner")),
    responses(
        (status = 200, description = "Cart committed as an order", body = ApiResponse<Order>),
        (status = 409, description = "Cart empty, changed or short on stock"),
    ),
    tag = "Cart"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let prepared =
        within_deadline(&state, cart_service::prepare_checkout(&state, &user_id)).await?;
    let order = cart_service::complete_checkout(&state, prepared).await?;
    Ok(Json(ApiResponse::success("Checked out", order, None)))
}

#[utoipa::path(
    get,
    path = "/api/cart/{user_id}/completed",
    params(("user_id" = String, Path, description = "Cart owner")),
    responses(
        (status = 200, description = "Committed orders of the user", body = ApiResponse<OrderList>),
    ),
    tag = "Cart"
)]
pub async fn completed_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let orders = within_deadline(&state, cart_service::completed_orders(&state, &user_id)).await?;
    let meta = Meta::for_list(orders.len());
    Ok(Json(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    )))
}
