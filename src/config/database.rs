//! Database collaborator for the `system_config` override layer.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// One result row keyed by column name
pub type Row = Map<String, Value>;

pub const CREATE_SYSTEM_CONFIG_TABLE: &str = "CREATE TABLE IF NOT EXISTS system_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
)";

pub const SELECT_ACTIVE_OVERRIDES: &str =
    "SELECT key, value FROM system_config WHERE is_active = 1 ORDER BY key";

pub const UPSERT_OVERRIDE: &str = "INSERT INTO system_config (key, value, updated_at, is_active)
    VALUES (?, ?, ?, 1)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at,
        is_active = 1";

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),
    #[error("Query failed: {0}")]
    Query(String),
}

/// Minimal async access the configuration layer needs
#[async_trait]
pub trait DatabaseManager: Send + Sync {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError>;

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, DatabaseError> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Returns the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DatabaseError>;

    async fn disconnect(&self) {}
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabaseManager;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::{CREATE_SYSTEM_CONFIG_TABLE, DatabaseError, DatabaseManager, Row};
    use async_trait::async_trait;
    use serde_json::Value;
    use sqlx::query::Query;
    use sqlx::sqlite::{
        Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
    };
    use sqlx::{Column, Row as _, TypeInfo, ValueRef};
    use std::str::FromStr;
    use tracing::info;

    /// SQLite-backed manager on a small connection pool
    #[derive(Debug, Clone)]
    pub struct SqliteDatabaseManager {
        pool: SqlitePool,
    }

    impl SqliteDatabaseManager {
        pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
            let options = SqliteConnectOptions::from_str(url)
                .map_err(|e| DatabaseError::Unavailable(e.to_string()))?
                .create_if_missing(true);
            // Every connection to :memory: is its own database
            let pool_options = if url.contains(":memory:") {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                SqlitePoolOptions::new().max_connections(5)
            };
            let pool = pool_options
                .connect_with(options)
                .await
                .map_err(|e| DatabaseError::Unavailable(e.to_string()))?;

            info!("Connected to configuration database {}", url);
            Ok(Self { pool })
        }

        pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
            self.execute(CREATE_SYSTEM_CONFIG_TABLE, &[]).await.map(|_| ())
        }
    }

    fn bind_params<'q>(
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
        params: &[Value],
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        query
    }

    fn row_to_map(row: &SqliteRow) -> Row {
        let mut map = Row::new();
        for column in row.columns() {
            let index = column.ordinal();
            let type_name = match row.try_get_raw(index) {
                Ok(raw) if !raw.is_null() => raw.type_info().name().to_ascii_uppercase(),
                _ => {
                    map.insert(column.name().to_string(), Value::Null);
                    continue;
                }
            };

            let value = match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" => row
                    .try_get_unchecked::<i64, _>(index)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "REAL" | "FLOAT" | "DOUBLE" => row
                    .try_get_unchecked::<f64, _>(index)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "BOOLEAN" => row
                    .try_get_unchecked::<bool, _>(index)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                _ => row
                    .try_get_unchecked::<String, _>(index)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            };
            map.insert(column.name().to_string(), value);
        }
        map
    }

    #[async_trait]
    impl DatabaseManager for SqliteDatabaseManager {
        async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
            let rows = bind_params(sqlx::query(sql), params)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.iter().map(row_to_map).collect())
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DatabaseError> {
            let result = bind_params(sqlx::query(sql), params)
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(result.rows_affected())
        }

        async fn disconnect(&self) {
            self.pool.close().await;
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::database::{SELECT_ACTIVE_OVERRIDES, UPSERT_OVERRIDE};
        use serde_json::json;

        async fn memory_db() -> SqliteDatabaseManager {
            let db = SqliteDatabaseManager::connect("sqlite::memory:").await.unwrap();
            db.ensure_schema().await.unwrap();
            db
        }

        #[tokio::test]
        async fn test_upsert_and_select() {
            let db = memory_db().await;
            let now = json!("2026-01-01T00:00:00Z");

            db.execute(UPSERT_OVERRIDE, &[json!("app.workers"), json!("8"), now.clone()])
                .await
                .unwrap();
            db.execute(UPSERT_OVERRIDE, &[json!("app.workers"), json!("6"), now.clone()])
                .await
                .unwrap();
            db.execute(UPSERT_OVERRIDE, &[json!("app.debug"), json!("true"), now])
                .await
                .unwrap();

            let rows = db.fetch_all(SELECT_ACTIVE_OVERRIDES, &[]).await.unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0]["key"], "app.debug");
            assert_eq!(rows[1]["value"], "6");
        }

        #[tokio::test]
        async fn test_inactive_rows_ignored() {
            let db = memory_db().await;
            db.execute(
                "INSERT INTO system_config (key, value, updated_at, is_active) VALUES (?, ?, ?, 0)",
                &[json!("redis.db"), json!("3"), json!("2026-01-01T00:00:00Z")],
            )
            .await
            .unwrap();

            assert!(db.fetch_all(SELECT_ACTIVE_OVERRIDES, &[]).await.unwrap().is_empty());
            let row = db
                .fetch_one("SELECT is_active FROM system_config WHERE key = ?", &[json!("redis.db")])
                .await
                .unwrap()
                .unwrap();
            assert_eq!(row["is_active"], 0);
        }
    }
}
