use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::core::config::DatabaseConfig;
use crate::core::error::AppResult;
use crate::storage::pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolError, PooledConnection};

/// Opens SQLite connections for the pool.
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    pub fn new(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        Ok(Self { options })
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnector {
    type Connection = SqliteConnection;

    async fn connect(&self) -> Result<SqliteConnection, PoolError> {
        self.options
            .connect()
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))
    }

    async fn is_valid(&self, conn: &mut SqliteConnection) -> bool {
        conn.ping().await.is_ok()
    }
}

pub type DbConnection = PooledConnection<SqliteConnector>;

pub struct Database {
    pool: ConnectionPool<SqliteConnector>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.url);

        let connector = SqliteConnector::new(&config.url)?;
        let pool = ConnectionPool::new(
            connector,
            PoolConfig {
                min_connections: config.min_connections,
                max_connections: config.max_connections,
                acquire_timeout: config.acquire_timeout(),
            },
        )?;
        pool.init().await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> AppResult<()> {
        info!("Running database migrations");
        let mut conn = self.acquire().await?;
        sqlx::migrate!("./migrations").run(&mut *conn).await?;
        Ok(())
    }

    pub fn pool(&self) -> &ConnectionPool<SqliteConnector> {
        &self.pool
    }

    pub async fn acquire(&self) -> AppResult<DbConnection> {
        Ok(self.pool.acquire().await?)
    }

    /// Run `op` inside a transaction. Commits on success; on failure the
    /// transaction is rolled back and the error returned to the caller.
    pub async fn transaction<T, F>(&self, op: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        let mut conn = self.acquire().await?;
        let mut tx = conn.begin().await?;

        match op(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                warn!("Transaction aborted: {}", e);
                if let Err(rollback) = tx.rollback().await {
                    error!("Rollback failed, discarding connection: {}", rollback);
                    conn.mark_broken();
                }
                Err(e)
            }
        }
    }

    pub fn close(&self) {
        self.pool.close();
    }
}
