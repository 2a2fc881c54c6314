use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

/// Opens a pool, creating the database file on first use.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    // Each connection to `:memory:` is its own database.
    let max_connections =
        if database_url.contains(":memory:") { 1 } else { max_connections.max(1) };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::connect_with_settings;

    #[tokio::test]
    async fn pragmas_are_applied_on_connect() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let foreign_keys = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma")
            .get::<i64, _>(0);
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn in_memory_pool_is_capped_to_one_connection() {
        let pool = connect_with_settings("sqlite::memory:", 8, 30).await.expect("connect");
        sqlx::query("CREATE TABLE pool_check (id INTEGER)").execute(&pool).await.expect("create");
        let (a, b) = tokio::join!(
            sqlx::query("SELECT COUNT(*) FROM pool_check").fetch_one(&pool),
            sqlx::query("SELECT COUNT(*) FROM pool_check").fetch_one(&pool),
        );
        assert!(a.is_ok() && b.is_ok());
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let error = connect_with_settings("postgres://nope", 1, 1).await.expect_err("not sqlite");
        assert!(!error.to_string().is_empty());
    }
}
