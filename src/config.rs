use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => bail!("unknown ORDER_STORE '{other}', expected memory or postgres"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub store: StoreBackend,
    pub host: String,
    pub port: u16,
    pub user_service_url: String,
    pub product_service_url: String,
    pub upstream_timeout: Duration,
    pub request_timeout: Duration,
    pub mock_services: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        let store = match env::var("ORDER_STORE") {
            Ok(value) => value.parse()?,
            Err(_) if database_url.is_some() => StoreBackend::Postgres,
            Err(_) => StoreBackend::Memory,
        };
        if store == StoreBackend::Postgres && database_url.is_none() {
            bail!("ORDER_STORE=postgres requires DATABASE_URL");
        }

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        Ok(Self {
            database_url,
            store,
            host,
            port,
            user_service_url: env::var("USER_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            product_service_url: env::var("PRODUCT_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
            upstream_timeout: millis_from_env("UPSTREAM_TIMEOUT_MS", 3000)?,
            request_timeout: millis_from_env("REQUEST_TIMEOUT_MS", 10_000)?,
            mock_services: env::var("MOCK_SERVICES")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}

fn millis_from_env(key: &str, default: u64) -> anyhow::Result<Duration> {
    let millis = match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a number of milliseconds"))?,
        Err(_) => default,
    };
    Ok(Duration::from_millis(millis))
}
