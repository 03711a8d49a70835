use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;

pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, sqlx::Error> {
    match &config.url {
        Some(url) => PgConnectOptions::from_str(url),
        None => Ok(PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)),
    }
}

/// Builds the pool, checks that the database is reachable and applies migrations.
/// Any failure here is meant to abort startup.
pub async fn establish_connection(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let options = connect_options(config)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy_with(options);

    probe(&pool).await?;
    tracing::info!("Connected to PostgreSQL database successfully");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations executed successfully");

    Ok(pool)
}

/// Checks out one connection and hands it straight back.
pub async fn probe(pool: &PgPool) -> Result<(), sqlx::Error> {
    let conn = pool.acquire().await?;
    drop(conn);
    Ok(())
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
