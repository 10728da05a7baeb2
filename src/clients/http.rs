use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    CollaboratorError, ProductCollaborator, ProductInfo, ProductType, UserCollaborator, UserInfo,
};

fn build_client(timeout: Duration) -> Result<Client, CollaboratorError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CollaboratorError::Unavailable(format!("Failed to create HTTP client: {e}")))
}

fn unavailable(err: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Unavailable(err.to_string())
}

/// User service client: `GET {base}/api/users/{id}`.
#[derive(Clone)]
pub struct HttpUserClient {
    base_url: String,
    client: Client,
}

impl HttpUserClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl UserCollaborator for HttpUserClient {
    #[instrument(skip(self))]
    async fn get_user(&self, user_id: &str) -> Result<UserInfo, CollaboratorError> {
        let url = format!("{}/api/users/{}", self.base_url, user_id);
        debug!(%url, "Sending request");

        let resp = self.client.get(&url).send().await.map_err(unavailable)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound);
        }
        resp.error_for_status()
            .map_err(unavailable)?
            .json::<UserInfo>()
            .await
            .map_err(unavailable)
    }
}

// Catalog representation: decimal price, `type` field.
#[derive(Debug, Deserialize)]
struct CatalogProduct {
    id: i64,
    name: String,
    price: f64,
    stock: i32,
    #[serde(rename = "type", default)]
    product_type: ProductType,
}

// Largest f64 strictly below 2^63, so the cast cannot saturate.
const MAX_MINOR_UNITS: f64 = 9_223_372_036_854_774_784.0;

impl TryFrom<CatalogProduct> for ProductInfo {
    type Error = CollaboratorError;

    fn try_from(p: CatalogProduct) -> Result<Self, Self::Error> {
        let minor = (p.price * 100.0).round();
        if !minor.is_finite() || minor < 0.0 || minor > MAX_MINOR_UNITS {
            return Err(CollaboratorError::Rejected(format!(
                "product {} has an unusable price {}",
                p.id, p.price
            )));
        }
        Ok(ProductInfo {
            id: p.id,
            name: p.name,
            price: minor as i64,
            stock: p.stock,
            product_type: p.product_type,
        })
    }
}

#[derive(Serialize)]
struct StockUpdate {
    stock: i32,
}

/// Product service client: `GET`/`PUT {base}/api/products/{id}`.
#[derive(Clone)]
pub struct HttpProductClient {
    base_url: String,
    client: Client,
}

impl HttpProductClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }

    fn product_url(&self, product_id: i64) -> String {
        format!("{}/api/products/{}", self.base_url, product_id)
    }
}

#[async_trait]
impl ProductCollaborator for HttpProductClient {
    #[instrument(skip(self))]
    async fn get_product(&self, product_id: i64) -> Result<ProductInfo, CollaboratorError> {
        let url = self.product_url(product_id);
        debug!(%url, "Sending request");

        let resp = self.client.get(&url).send().await.map_err(unavailable)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound);
        }
        let product = resp
            .error_for_status()
            .map_err(unavailable)?
            .json::<CatalogProduct>()
            .await
            .map_err(unavailable)?;
        product.try_into()
    }

    /// The catalog only exposes a full stock update, so this reads the current
    /// level and writes the decremented one.
    #[instrument(skip(self))]
    async fn decrease_stock(
        &self,
        product_id: i64,
        quantity: i32,
    ) -> Result<(), CollaboratorError> {
        let product = self.get_product(product_id).await?;
        let remaining = product.stock - quantity;
        if remaining < 0 {
            return Err(CollaboratorError::Rejected(format!(
                "only {} units of product {} left",
                product.stock, product_id
            )));
        }

        let resp = self
            .client
            .put(self.product_url(product_id))
            .json(&StockUpdate { stock: remaining })
            .send()
            .await
            .map_err(unavailable)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(CollaboratorError::NotFound),
            status if status.is_client_error() => Err(CollaboratorError::Rejected(format!(
                "stock update refused with {status}"
            ))),
            _ => resp.error_for_status().map(|_| ()).map_err(unavailable),
        }
    }
}
