use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    clients::{
        FixedCatalog, FixedUsers, HttpProductClient, HttpUserClient, ProductCollaborator,
        UserCollaborator,
    },
    config::{AppConfig, StoreBackend},
    db::{create_pool, orm_from_pool, run_migrations},
    store::{MemoryOrderStore, PgOrderStore, SharedStore},
};

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub users: Arc<dyn UserCollaborator>,
    pub products: Arc<dyn ProductCollaborator>,
    /// Bound applied to every single collaborator call.
    pub upstream_timeout: Duration,
    /// Bound applied to a whole request by the HTTP handlers.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        users: Arc<dyn UserCollaborator>,
        products: Arc<dyn ProductCollaborator>,
    ) -> Self {
        Self {
            store,
            users,
            products,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, upstream: Duration, request: Duration) -> Self {
        self.upstream_timeout = upstream;
        self.request_timeout = request;
        self
    }

    /// Wires the configured store backend and collaborators.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store: SharedStore = match (config.store, config.database_url.as_deref()) {
            (StoreBackend::Postgres, Some(url)) => {
                let pool = create_pool(url).await?;
                run_migrations(&orm_from_pool(pool.clone()), "./migrations").await?;
                info!("using postgres order store");
                Arc::new(PgOrderStore::new(pool))
            }
            _ => {
                info!("using in-memory order store");
                Arc::new(MemoryOrderStore::new())
            }
        };

        let (users, products): (Arc<dyn UserCollaborator>, Arc<dyn ProductCollaborator>) =
            if config.mock_services {
                info!("MOCK_SERVICES enabled, user and product services are simulated");
                (
                    Arc::new(FixedUsers::allow_all()),
                    Arc::new(FixedCatalog::any_product(1000, 100)),
                )
            } else {
                (
                    Arc::new(HttpUserClient::new(
                        config.user_service_url.as_str(),
                        config.upstream_timeout,
                    )?),
                    Arc::new(HttpProductClient::new(
                        config.product_service_url.as_str(),
                        config.upstream_timeout,
                    )?),
                )
            };

        Ok(Self::new(store, users, products)
            .with_timeouts(config.upstream_timeout, config.request_timeout))
    }
}
