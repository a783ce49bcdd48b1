use sqlx::SqliteConnection;

/// Ids bound per statement. SQLite caps host parameters at 999 by default.
pub const MAX_IDS_PER_STATEMENT: usize = 998;

/// `?, ?, ?` for an `IN (...)` list.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Run `<prefix> (<ids>)` once per chunk of ids and sum the affected rows.
///
/// `prefix` must end with `IN`, e.g. `DELETE FROM states WHERE state_id IN`.
pub async fn execute_for_ids(
    conn: &mut SqliteConnection,
    prefix: &str,
    ids: &[i64],
) -> Result<u64, sqlx::Error> {
    let mut affected = 0;
    for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
        let sql = format!("{prefix} ({})", placeholders(chunk.len()));
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        affected += query.execute(&mut *conn).await?.rows_affected();
    }
    Ok(affected)
}

/// Select a single `i64` column with `<prefix> (<ids>)`, chunked like
/// [`execute_for_ids`].
pub async fn select_ids_for_ids(
    conn: &mut SqliteConnection,
    prefix: &str,
    ids: &[i64],
) -> Result<Vec<i64>, sqlx::Error> {
    let mut selected = Vec::new();
    for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
        let sql = format!("{prefix} ({})", placeholders(chunk.len()));
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        selected.extend(query.fetch_all(&mut *conn).await?);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
