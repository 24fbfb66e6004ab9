use metrics::gauge;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{info, warn};

use crate::{config::AppConfig, migrator::Migrator};

pub type DbPool = DatabaseConnection;

/// Pool sizing and timeouts for the order database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
        }
    }
}

impl DbConfig {
    /// Each connection to an in-memory SQLite database opens a fresh, empty
    /// database, so the pool is pinned to one connection there.
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite::memory:") || self.url.contains("mode=memory")
    }

    fn pool_bounds(&self) -> (u32, u32) {
        if self.is_in_memory() {
            (1, 1)
        } else {
            let max = self.max_connections.max(1);
            (self.min_connections.min(max), max)
        }
    }
}

pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    let (min, max) = config.pool_bounds();
    if config.is_in_memory() && config.max_connections > 1 {
        warn!(
            requested = config.max_connections,
            "in-memory database; pool limited to a single connection"
        );
    }

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max)
        .min_connections(min)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("storefront.db.max_connections", f64::from(max));

    let pool = Database::connect(opt).await?;
    info!(max_connections = max, "database pool ready");
    Ok(pool)
}

pub async fn establish_connection(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    establish_connection_with_config(&cfg.into()).await
}

/// Applies every pending migration.
pub async fn run_migrations(db: &DbPool) -> Result<(), DbErr> {
    let pending = Migrator::get_pending_migrations(db).await?.len();
    if pending == 0 {
        info!("schema is up to date");
        return Ok(());
    }
    info!(pending, "applying migrations");
    Migrator::up(db, None).await?;
    info!("migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sqlite_uses_one_connection() {
        let cfg = DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 8,
            ..DbConfig::default()
        };
        assert!(cfg.is_in_memory());
        assert_eq!(cfg.pool_bounds(), (1, 1));

        let cfg = DbConfig {
            url: "postgres://shop@localhost/shop".into(),
            max_connections: 8,
            min_connections: 20,
            ..DbConfig::default()
        };
        assert!(!cfg.is_in_memory());
        assert_eq!(cfg.pool_bounds(), (8, 8));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            ..DbConfig::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(Migrator::get_pending_migrations(&pool).await.unwrap().is_empty());
    }
}
