use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[error("Not found")]
    NotFound,

    /// Lock contention, serialization failure or deadlock. The same work is
    /// expected to succeed when attempted again.
    #[error("Transient database error: {0}")]
    Transient(String),

    /// The store is unreadable and must be rebuilt.
    #[error("Database corruption detected: {0}")]
    Corruption(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Transient(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, DbError::Corruption(_))
    }
}

pub type DbResult<T> = Result<T, DbError>;
