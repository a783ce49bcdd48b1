mod backend;
mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
mod recovery;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use backend::{Backend, ClassifyExt};
pub use error::{DbError, DbResult};
pub use recovery::{quarantine_database_file, quarantine_path, staging_path};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes and purges.
    pub write: sqlx::PgPool,
    /// Optional read replica, used by the recorder repository for reads.
    pub read: Option<sqlx::PgPool>,
}

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    purge: Arc<dyn PurgeRepo>,
    recorder: Arc<dyn RecorderRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            purge: Arc::new(sqlite::SqlitePurgeRepo::new(pool.clone())),
            recorder: Arc::new(sqlite::SqliteRecorderRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            purge: Arc::new(postgres::PostgresPurgeRepo::new(write_pool.clone())),
            recorder: Arc::new(postgres::PostgresRecorderRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
        };
        DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                // Every connection to `:memory:` opens its own empty database.
                let max_connections = if cfg.is_in_memory() {
                    1
                } else {
                    cfg.max_connections
                };
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .foreign_keys(true)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await
                    .classify(Backend::Sqlite)?;

                Ok(DbPool::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let pool_options = || {
                    sqlx::postgres::PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(Some(std::time::Duration::from_secs(
                            cfg.idle_timeout_secs,
                        )))
                };
                let connect_options = |url: &str| -> DbResult<sqlx::postgres::PgConnectOptions> {
                    let options: sqlx::postgres::PgConnectOptions = url.parse()?;
                    Ok(options.ssl_mode(pg_ssl_mode(&cfg.ssl_mode)))
                };

                let write_pool = pool_options()
                    .connect_with(connect_options(&cfg.url)?)
                    .await
                    .classify(Backend::Postgres)?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(
                        pool_options()
                            .connect_with(connect_options(read_url)?)
                            .await
                            .classify(Backend::Postgres)?,
                    )
                } else {
                    None
                };

                Ok(DbPool::from_postgres(write_pool, read_pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner
    /// This automatically creates and manages a _sqlx_migrations table
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(&pools.write)
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Storage engine behind this pool.
    pub fn backend(&self) -> Backend {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => Backend::Sqlite,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(_) => Backend::Postgres,
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Get purge repository
    pub fn purge(&self) -> Arc<dyn PurgeRepo> {
        Arc::clone(&self.repos.purge)
    }

    /// Get recorder repository
    pub fn recorder(&self) -> Arc<dyn RecorderRepo> {
        Arc::clone(&self.repos.recorder)
    }

    /// Swap the purge repository, for injecting storage faults in tests.
    #[cfg(test)]
    pub(crate) fn with_purge_repo(mut self, purge: Arc<dyn PurgeRepo>) -> Self {
        self.repos.purge = purge;
        self
    }

    /// Close every connection. Pending acquires fail afterwards.
    pub async fn close(&self) {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                pools.write.close().await;
                if let Some(read) = &pools.read {
                    read.close().await;
                }
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.is_closed(),
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => pools.write.is_closed(),
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Replace a corrupt store with an empty one.
    ///
    /// The replacement is created and migrated at `<path>.rebuild` first; a
    /// failure there leaves this pool open and the file untouched. Only then
    /// is this pool closed, the SQLite file and its sidecars moved to
    /// `<path>.corrupt.<timestamp>`, and the staged file moved into place.
    /// Returns the new pool and where the old file went.
    ///
    /// On an error after the close, this pool stays closed; callers reopen
    /// the store with [`DbPool::from_config`]. PostgreSQL stores are never
    /// rebuilt.
    pub async fn rebuild(
        &self,
        config: &DatabaseConfig,
    ) -> DbResult<(DbPool, Option<std::path::PathBuf>)> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) if cfg.is_in_memory() => {
                let pool = Self::open_migrated(config).await?;
                self.close().await;
                Ok((pool, None))
            }
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let path = std::path::Path::new(&cfg.path);
                let staged = staging_path(path);
                recovery::remove_database_file(&staged)?;

                let staged_config = DatabaseConfig::Sqlite(crate::config::SqliteConfig {
                    path: staged.to_string_lossy().into_owned(),
                    create_if_missing: true,
                    ..cfg.clone()
                });
                let staged_pool = Self::open_migrated(&staged_config).await?;
                staged_pool.close().await;

                self.close().await;
                let moved_to =
                    recovery::swap_in_staged_database(path, &staged, chrono::Utc::now())?;
                if let Some(moved_to) = &moved_to {
                    tracing::warn!(
                        path = %cfg.path,
                        moved_to = %moved_to.display(),
                        "Moved corrupt database out of the way"
                    );
                }
                let pool = DbPool::from_config(config).await?;
                Ok((pool, moved_to))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(_) => Err(DbError::Internal(
                "PostgreSQL stores cannot be rebuilt automatically".into(),
            )),
        }
    }

    async fn open_migrated(config: &DatabaseConfig) -> DbResult<DbPool> {
        let pool = DbPool::from_config(config).await?;
        if let Err(e) = pool.run_migrations().await {
            pool.close().await;
            return Err(e);
        }
        Ok(pool)
    }
}

#[cfg(feature = "database-postgres")]
fn pg_ssl_mode(mode: &crate::config::PostgresSslMode) -> sqlx::postgres::PgSslMode {
    use crate::config::PostgresSslMode;
    use sqlx::postgres::PgSslMode;

    match mode {
        PostgresSslMode::Disable => PgSslMode::Disable,
        PostgresSslMode::Prefer => PgSslMode::Prefer,
        PostgresSslMode::Require => PgSslMode::Require,
        PostgresSslMode::VerifyCa => PgSslMode::VerifyCa,
        PostgresSslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}
