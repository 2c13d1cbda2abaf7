use crate::config::DatabaseConfig;
use crate::error::Error;
use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub mod migrations;
pub mod models;
pub mod repositories;

/// Database service for handling connections and migrations
pub struct DatabaseService {
    pub pool: Arc<PgPool>,
}

impl DatabaseService {
    /// Create a new database service
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing Database service");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL database");

        let service = Self {
            pool: Arc::new(pool),
        };

        if config.auto_migrate {
            service.run_migrations().await?;
        }

        Ok(service)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    /// Health check for database
    pub async fn health_check(&self) -> Result<bool> {
        Ok(check_pool(&self.pool).await)
    }
}

/// Run a trivial query against the pool
pub async fn check_pool(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            error!("Database health check failed: {}", e);
            false
        }
    }
}

/// Connect to the database named by `TEST_DATABASE_URL` and migrate it.
/// Returns `None` (and the caller skips) when the variable is not set.
#[cfg(test)]
pub async fn test_pool() -> Option<Arc<PgPool>> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            println!("Skipping database test. Set TEST_DATABASE_URL to run it.");
            return None;
        }
    };

    let config = DatabaseConfig {
        url,
        max_connections: 2,
        auto_migrate: true,
    };
    let service = DatabaseService::new(&config)
        .await
        .expect("test database should be reachable");
    Some(service.pool)
}
