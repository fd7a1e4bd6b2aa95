//! `kv_store` schema versioning.
//!
//! The applied version lives in `PRAGMA user_version`, so a database carries
//! no bookkeeping tables besides `kv_store`. Step `n` in [`STEPS`] upgrades a
//! database from version `n` to `n + 1`.

use super::StoreError;
use tokio_rusqlite::Connection;

const STEPS: &[&str] = &[include_str!("../../migrations/001_kv_store.sql")];

/// Schema version this build reads and writes.
pub const CURRENT_VERSION: i64 = STEPS.len() as i64;

/// Bring the schema to [`CURRENT_VERSION`] in a single transaction.
///
/// # Errors
///
/// Fails with [`StoreError::MigrationFailed`] when the database was written
/// by a newer schema, and with [`StoreError::Database`] when a step fails.
pub async fn upgrade(conn: &Connection) -> Result<(), StoreError> {
    conn.call(|conn| -> Result<(), StoreError> {
        let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found > CURRENT_VERSION {
            return Err(StoreError::MigrationFailed(format!(
                "kv_store schema v{found} is newer than supported v{CURRENT_VERSION}"
            )));
        }
        if found == CURRENT_VERSION {
            return Ok(());
        }

        let tx = conn.transaction()?;
        for step in STEPS.iter().skip(usize::try_from(found).unwrap_or(0)) {
            tx.execute_batch(step)?;
        }
        tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
        tx.commit()?;

        tracing::debug!(from = found, to = CURRENT_VERSION, "upgraded kv_store schema");
        Ok(())
    })
    .await
    .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_rusqlite::rusqlite;

    async fn user_version(conn: &Connection) -> i64 {
        conn.call(|conn| conn.pragma_query_value(None, "user_version", |row| row.get(0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().await.unwrap();
        upgrade(&conn).await.unwrap();
        assert_eq!(user_version(&conn).await, CURRENT_VERSION);

        let tables: Vec<String> = conn
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
                let names = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap();
        assert_eq!(tables, vec!["kv_store".to_string()]);
    }

    #[tokio::test]
    async fn test_upgrade_keeps_existing_rows() {
        let conn = Connection::open_in_memory().await.unwrap();
        upgrade(&conn).await.unwrap();
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute("INSERT INTO kv_store (key, value, updated_at) VALUES ('k', 'v', 'now')", [])?;
            Ok(())
        })
        .await
        .unwrap();

        upgrade(&conn).await.unwrap();

        let value: String = conn
            .call(|conn| conn.query_row("SELECT value FROM kv_store WHERE key = 'k'", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(value, "v");
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(|conn| conn.pragma_update(None, "user_version", CURRENT_VERSION + 1))
            .await
            .unwrap();

        let err = upgrade(&conn).await.unwrap_err();
        assert!(matches!(err, StoreError::MigrationFailed(_)));
    }
}
