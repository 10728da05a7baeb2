use std::future::Future;

use axum::Router;

use crate::{
    error::{AppError, AppResult, OrderError},
    state::AppState,
};

pub mod cart;
pub mod doc;
pub mod health;
pub mod orders;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/orders", orders::router())
        .nest("/users", orders::user_router())
        .nest("/cart", cart::router())
}

/// Runs a service call under the request deadline. Hitting the deadline drops
/// the call, which rolls back whatever it had not committed. Commit stages
/// (`place_order`, `complete_checkout`) are never passed through here.
pub(crate) async fn within_deadline<T>(
    state: &AppState,
    call: impl Future<Output = Result<T, OrderError>>,
) -> AppResult<T> {
    match tokio::time::timeout(state.request_timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AppError::Timeout),
    }
}
