use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    SqlitePool,
};

use crate::{
    config::Config, error::Error, queue::SqliteRetryQueue,
    ratelimit::SqliteSlidingWindowLimiter,
};

/// Owns the database shared by the retry queue and the rate limiter.
pub struct Service {
    db: SqlitePool,
    config: Config,
}

#[bon::bon]
impl Service {
    pub async fn connect() -> Result<Self, Error> {
        Self::connect_with().config(Config::default()).call().await
    }

    /// Opens (creating if needed) the database at `config.db_path()` and runs
    /// pending migrations.
    #[builder]
    pub async fn connect_with(config: Config) -> Result<Self, Error> {
        let opts = SqliteConnectOptions::new()
            .filename(config.db_path())
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Normal)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path = config.db_path(), "Database ready");

        Ok(Self { db: pool, config })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> SqliteRetryQueue {
        SqliteRetryQueue::new(self.db.clone())
    }

    /// Limiter configured from `rate_limit_threshold` and
    /// `rate_limit_interval_ms`.
    pub fn limiter(&self) -> Result<SqliteSlidingWindowLimiter, Error> {
        SqliteSlidingWindowLimiter::new(
            self.db.clone(),
            self.config.rate_limit_threshold,
            self.config.rate_limit_interval(),
        )
    }
}
