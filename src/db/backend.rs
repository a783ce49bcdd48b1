use std::fmt;

use super::{DbError, DbResult};

/// Primary result codes. Extended codes carry the primary code in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// serialization_failure, deadlock_detected, lock_not_available
const POSTGRES_TRANSIENT_CODES: &[&str] = &["40001", "40P01", "55P03"];

/// Storage engine behind a [`DbPool`](super::DbPool).
///
/// Each engine reports lock contention and file damage with its own error
/// codes; repositories run every `sqlx::Error` through [`Backend::classify`]
/// so callers only look at [`DbError::is_transient`] and
/// [`DbError::is_corruption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
        }
    }

    /// Whether a database error code means "try again".
    pub fn is_transient_code(&self, code: &str) -> bool {
        match self {
            Backend::Sqlite => {
                matches!(primary_sqlite_code(code), Some(SQLITE_BUSY | SQLITE_LOCKED))
            }
            Backend::Postgres => POSTGRES_TRANSIENT_CODES.contains(&code),
        }
    }

    /// Whether a database error code means the store file is damaged.
    pub fn is_corruption_code(&self, code: &str) -> bool {
        match self {
            Backend::Sqlite => {
                matches!(primary_sqlite_code(code), Some(SQLITE_CORRUPT | SQLITE_NOTADB))
            }
            Backend::Postgres => false,
        }
    }

    pub fn is_transient(&self, err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err
                .code()
                .is_some_and(|code| self.is_transient_code(&code)),
            _ => false,
        }
    }

    pub fn is_corruption(&self, err: &sqlx::Error) -> bool {
        if *self != Backend::Sqlite {
            return false;
        }
        match err {
            sqlx::Error::Database(db_err) => {
                db_err
                    .code()
                    .is_some_and(|code| self.is_corruption_code(&code))
                    || db_err.message().contains("malformed")
            }
            _ => false,
        }
    }

    /// Map a raw sqlx error onto the recorder's error taxonomy.
    pub fn classify(&self, err: sqlx::Error) -> DbError {
        if self.is_transient(&err) {
            DbError::Transient(err.to_string())
        } else if self.is_corruption(&err) {
            DbError::Corruption(err.to_string())
        } else {
            DbError::Sqlx(err)
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify the error of a finished sqlx call with `?`-friendly syntax.
pub trait ClassifyExt<T> {
    fn classify(self, backend: Backend) -> DbResult<T>;
}

impl<T> ClassifyExt<T> for Result<T, sqlx::Error> {
    fn classify(self, backend: Backend) -> DbResult<T> {
        self.map_err(|err| backend.classify(err))
    }
}

fn primary_sqlite_code(code: &str) -> Option<i32> {
    code.parse::<i32>().ok().map(|code| code & 0xff)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("5", true)]
    #[case("6", true)]
    // SQLITE_BUSY_SNAPSHOT, SQLITE_LOCKED_SHAREDCACHE
    #[case("517", true)]
    #[case("262", true)]
    #[case("1", false)]
    #[case("11", false)]
    #[case("19", false)]
    #[case("not-a-code", false)]
    fn test_sqlite_transient_codes(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(Backend::Sqlite.is_transient_code(code), expected);
    }

    #[rstest]
    #[case("11", true)]
    #[case("26", true)]
    // SQLITE_CORRUPT_VTAB
    #[case("267", true)]
    #[case("5", false)]
    #[case("14", false)]
    fn test_sqlite_corruption_codes(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(Backend::Sqlite.is_corruption_code(code), expected);
    }

    #[rstest]
    #[case("40001", true)]
    #[case("40P01", true)]
    #[case("55P03", true)]
    #[case("23505", false)]
    #[case("42P01", false)]
    fn test_postgres_transient_codes(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(Backend::Postgres.is_transient_code(code), expected);
    }

    #[test]
    fn test_postgres_never_reports_corruption() {
        assert!(!Backend::Postgres.is_corruption_code("11"));
        assert!(!Backend::Postgres.is_corruption_code("XX001"));
    }

    #[test]
    fn test_non_database_errors_are_fatal() {
        let err = Backend::Sqlite.classify(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
        assert!(!err.is_corruption());
        assert!(matches!(err, DbError::Sqlx(_)));

        let err = Backend::Postgres.classify(sqlx::Error::PoolTimedOut);
        assert!(!err.is_transient());
    }

    #[cfg(feature = "database-sqlite")]
    #[tokio::test]
    async fn test_garbage_file_is_classified_as_corruption() {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![b'x'; 8192]).expect("Failed to write garbage file");

        let result = async {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(SqliteConnectOptions::new().filename(&path))
                .await?;
            sqlx::query("SELECT COUNT(*) FROM states")
                .fetch_one(&pool)
                .await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        let err = result.expect_err("Garbage file should not open as a database");
        assert!(Backend::Sqlite.classify(err).is_corruption());
    }
}
