use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    response::{ApiResponse, Meta},
    store::StoreError,
};

/// Coarse classification of [`OrderError`], used by callers that only need to
/// know how to react (retry, fix the request, report) and not which id failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    InsufficientStock,
    Conflict,
    PersistenceFailure,
    UpstreamUnavailable,
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user '{0}' not found")]
    UserNotFound(String),

    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("product {product_id} is not in order {order_id}")]
    ItemNotFound { order_id: Uuid, product_id: i64 },

    #[error(
        "insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        available: i32,
        requested: i32,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{resource} service unavailable for '{id}': {reason}")]
    UpstreamUnavailable {
        resource: &'static str,
        id: String,
        reason: String,
    },

    #[error("failed to create order: {0}")]
    CreateOrderFailed(#[source] StoreError),

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),

    #[error("order processing was interrupted: {0}")]
    Interrupted(String),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::InvalidInput(_) => ErrorKind::InvalidInput,
            OrderError::UserNotFound(_)
            | OrderError::ProductNotFound(_)
            | OrderError::OrderNotFound(_)
            | OrderError::ItemNotFound { .. } => ErrorKind::NotFound,
            OrderError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            OrderError::InvalidState(_) => ErrorKind::Conflict,
            OrderError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            OrderError::CreateOrderFailed(_)
            | OrderError::Persistence(_)
            | OrderError::Interrupted(_) => ErrorKind::PersistenceFailure,
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => OrderError::OrderNotFound(id),
            StoreError::ItemNotFound {
                order_id,
                product_id,
            } => OrderError::ItemNotFound {
                order_id,
                product_id,
            },
            StoreError::QuantityLimit {
                product_id,
                limit,
                requested,
            } => OrderError::InsufficientStock {
                product_id,
                available: limit,
                requested,
            },
            StoreError::AmountOverflow => OrderError::InvalidInput(err.to_string()),
            StoreError::NotCart(_)
            | StoreError::EmptyCart(_)
            | StoreError::CartChanged(_)
            | StoreError::CartUnavailable(_)
            | StoreError::InvalidTransition { .. }
            | StoreError::InvalidQuantity(_) => OrderError::InvalidState(err.to_string()),
            StoreError::Orm(_) | StoreError::Sqlx(_) | StoreError::Corrupt(_) => {
                OrderError::Persistence(err)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Request timed out")]
    Timeout,
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Order(err) => match err.kind() {
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InsufficientStock | ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::PersistenceFailure => StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // Storage details stay in the log.
        let message = match &self {
            AppError::Order(err) if err.kind() == ErrorKind::PersistenceFailure => {
                "Internal Server Error".to_string()
            }
            _ => self.to_string(),
        };

        let body = ApiResponse {
            message: message.clone(),
            data: Some(ErrorData { error: message }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
