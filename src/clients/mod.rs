//! Boundaries to the user and product services.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub mod fixed;
pub mod http;

pub use fixed::{FixedCatalog, FixedUsers};
pub use http::{HttpProductClient, HttpUserClient};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found")]
    NotFound,

    /// The service could not be reached or answered with an unexpected error.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The service understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    Ticket,
    #[default]
    Merchandise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductInfo {
    pub id: i64,
    pub name: String,
    /// Price in minor units.
    pub price: i64,
    /// Units on hand; negative means unlimited.
    pub stock: i32,
    pub product_type: ProductType,
}

impl ProductInfo {
    pub fn tracks_stock(&self) -> bool {
        self.product_type == ProductType::Merchandise && self.stock >= 0
    }

    pub fn can_supply(&self, quantity: i32) -> bool {
        !self.tracks_stock() || self.stock >= quantity
    }
}

#[async_trait]
pub trait UserCollaborator: Send + Sync + 'static {
    async fn get_user(&self, user_id: &str) -> Result<UserInfo, CollaboratorError>;
}

#[async_trait]
pub trait ProductCollaborator: Send + Sync + 'static {
    async fn get_product(&self, product_id: i64) -> Result<ProductInfo, CollaboratorError>;

    async fn decrease_stock(&self, product_id: i64, quantity: i32)
    -> Result<(), CollaboratorError>;
}

/// Bounds a collaborator call; an elapsed deadline reads as unavailability.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or_else(|_| {
            Err(CollaboratorError::Unavailable(format!(
                "no answer within {}ms",
                deadline.as_millis()
            )))
        })
}
