//! In-process stand-ins for the user and product services, used when the
//! service runs with `MOCK_SERVICES=true` and by tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use super::{
    CollaboratorError, ProductCollaborator, ProductInfo, ProductType, UserCollaborator, UserInfo,
};

/// Known users, or every user when built with [`FixedUsers::allow_all`].
#[derive(Default)]
pub struct FixedUsers {
    users: HashSet<String>,
    allow_all: bool,
    unavailable: bool,
    calls: AtomicUsize,
}

impl FixedUsers {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    /// Every lookup fails as if the service were down.
    pub fn unreachable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserCollaborator for FixedUsers {
    async fn get_user(&self, user_id: &str) -> Result<UserInfo, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(CollaboratorError::Unavailable("user service down".into()));
        }
        if self.allow_all || self.users.contains(user_id) {
            return Ok(UserInfo {
                id: user_id.to_string(),
                username: format!("user-{user_id}"),
                email: format!("{user_id}@example.com"),
            });
        }
        Err(CollaboratorError::NotFound)
    }
}

#[derive(Default)]
struct CatalogState {
    products: HashMap<i64, ProductInfo>,
    unavailable: HashSet<i64>,
    stock_failures: HashSet<i64>,
}

/// A product table with stock that `decrease_stock` really decrements.
#[derive(Default)]
pub struct FixedCatalog {
    state: Mutex<CatalogState>,
    // Template served for unknown ids when set (mock mode).
    fallback: Option<ProductInfo>,
    lookups: AtomicUsize,
}

impl FixedCatalog {
    pub fn new(products: impl IntoIterator<Item = ProductInfo>) -> Self {
        let catalog = Self::default();
        for product in products {
            catalog.put(product);
        }
        catalog
    }

    /// Serves any product id with the same price and stock.
    pub fn any_product(price: i64, stock: i32) -> Self {
        Self {
            fallback: Some(ProductInfo {
                id: 0,
                name: "Test product".into(),
                price,
                stock,
                product_type: ProductType::Merchandise,
            }),
            ..Self::default()
        }
    }

    pub fn put(&self, product: ProductInfo) {
        self.lock().products.insert(product.id, product);
    }

    pub fn set_unavailable(&self, product_id: i64) {
        self.lock().unavailable.insert(product_id);
    }

    pub fn fail_stock_updates(&self, product_id: i64) {
        self.lock().stock_failures.insert(product_id);
    }

    pub fn stock(&self, product_id: i64) -> Option<i32> {
        self.lock().products.get(&product_id).map(|p| p.stock)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProductCollaborator for FixedCatalog {
    async fn get_product(&self, product_id: i64) -> Result<ProductInfo, CollaboratorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        if state.unavailable.contains(&product_id) {
            return Err(CollaboratorError::Unavailable(format!(
                "product {product_id} lookup timed out"
            )));
        }
        if let Some(product) = state.products.get(&product_id) {
            return Ok(product.clone());
        }
        self.fallback
            .clone()
            .map(|template| ProductInfo {
                id: product_id,
                name: format!("Test product {product_id}"),
                ..template
            })
            .ok_or(CollaboratorError::NotFound)
    }

    async fn decrease_stock(
        &self,
        product_id: i64,
        quantity: i32,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        if state.stock_failures.contains(&product_id) || state.unavailable.contains(&product_id) {
            return Err(CollaboratorError::Unavailable(format!(
                "stock update for product {product_id} failed"
            )));
        }
        let Some(product) = state.products.get_mut(&product_id) else {
            // Fallback products have no stored stock to adjust.
            return if self.fallback.is_some() {
                Ok(())
            } else {
                Err(CollaboratorError::NotFound)
            };
        };
        if product.stock < quantity {
            return Err(CollaboratorError::Rejected(format!(
                "only {} units of product {} left",
                product.stock, product_id
            )));
        }
        product.stock -= quantity;
        Ok(())
    }
}
