use anyhow::Context;
use order_service::{
    config::AppConfig,
    db::{create_pool, orm_from_pool, run_migrations},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let url = config
        .database_url
        .context("DATABASE_URL must be set to run migrations")?;
    let pool = create_pool(&url).await?;
    run_migrations(&orm_from_pool(pool), "./migrations").await?;
    println!("Migrations applied");
    Ok(())
}
