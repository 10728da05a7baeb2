use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use uuid::Uuid;

use crate::{
    dto::orders::{CreateOrderRequest, OrderList, UpdateStatusRequest},
    error::AppResult,
    models::Order,
    response::{ApiResponse, Meta},
    routes::within_deadline,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/{id}", get(get_order))
        .route("/{id}/status", patch(update_order_status))
}

pub fn user_router() -> Router<AppState> {
    Router::new().route("/{user_id}/orders", get(list_user_orders))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<Order>),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown user or product"),
        (status = 409, description = "Insufficient stock"),
        (status = 503, description = "User or product service unavailable"),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Order>>)> {
    let prepared = within_deadline(&state, order_service::prepare_order(&state, payload)).await?;
    let order = order_service::place_order(&state, prepared).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Order created", order, None)),
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<Order>),
        (status = 404, description = "Order not found"),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = within_deadline(&state, order_service::get_order(&state, id)).await?;
    Ok(Json(ApiResponse::success("Ok", order, None)))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<Order>),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Transition not allowed"),
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = within_deadline(
        &state,
        order_service::update_status(&state, id, payload.status),
    )
    .await?;
    Ok(Json(ApiResponse::success("Status updated", order, None)))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}/orders",
    params(("user_id" = String, Path, description = "Owning user id")),
    responses(
        (status = 200, description = "All orders of the user", body = ApiResponse<OrderList>),
    ),
    tag = "Orders"
)]
pub async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let orders =
        within_deadline(&state, order_service::list_orders_for_user(&state, &user_id)).await?;
    let meta = Meta::for_list(orders.len());
    Ok(Json(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    )))
}
