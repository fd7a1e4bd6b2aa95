//! SQLite-backed durable store.
//!
//! Opens the database in WAL mode, brings the schema up to date, and maps the
//! [`DurableStore`] operations onto the `kv_store` table.

use super::{DurableStore, StoreError, schema};
use async_trait::async_trait;
use std::path::Path;
use tokio_rusqlite::{Connection, params, rusqlite};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// SQLite store handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and upgrades the schema to the current version.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await.map_err(|e| StoreError::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(StoreError::Database)?;

        schema::upgrade(&conn).await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, StoreError> {
                let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;

                match stmt.query_row(params![key], |row| row.get(0)) {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), StoreError> {
                conn.execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                    params![key, value, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), StoreError> {
                conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    async fn remove_if(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let expected = expected.to_string();
        self.conn
            .call(move |conn| -> Result<bool, StoreError> {
                let deleted = conn.execute("DELETE FROM kv_store WHERE key = ?1 AND value = ?2", params![key, expected])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = keys.to_vec();
        self.conn
            .call(move |conn| -> Result<(), StoreError> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare("DELETE FROM kv_store WHERE key = ?1")?;
                    for key in &keys {
                        stmt.execute(params![key])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    async fn all_keys(&self) -> Result<Vec<String>, StoreError> {
        self.conn
            .call(|conn| -> Result<Vec<String>, StoreError> {
                let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
                let keys = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, StoreError> {
                let mut stmt =
                    conn.prepare("SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![prefix], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let version = store
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("a", r#"{"x":1}"#).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some(r#"{"x":1}"#));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("k", "old").await.unwrap();
        store.set("k", "new").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.all_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_if_compares_value() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("k", "second").await.unwrap();

        assert!(!store.remove_if("k", "first").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));

        assert!(store.remove_if("k", "second").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.remove_if("k", "second").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("cache:a", "1").await.unwrap();
        store.set("cache:b", "2").await.unwrap();
        store.set("session", "3").await.unwrap();
        store.set("c%che:z", "4").await.unwrap();

        let keys = store.list_keys("cache:").await.unwrap();
        assert_eq!(keys, vec!["cache:a".to_string(), "cache:b".to_string()]);

        // wildcard characters in the prefix match literally
        let keys = store.list_keys("c%che:").await.unwrap();
        assert_eq!(keys, vec!["c%che:z".to_string()]);
    }

    #[tokio::test]
    async fn test_multi_remove() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.set("c", "3").await.unwrap();

        store
            .multi_remove(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(store.all_keys().await.unwrap(), vec!["c".to_string()]);
    }
}
