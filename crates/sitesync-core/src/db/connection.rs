//! Database connection management

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::migrations;
use super::store::KeyValueStore;
use crate::error::{Error, Result};

/// `SQLite`-backed durable store
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(&path)?;
        Self::configure(&conn)?;
        migrations::run(&mut conn)?;
        tracing::debug!(path = %path.display(), "Opened sync database");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        migrations::run(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Configure `SQLite` for optimal performance
    fn configure(conn: &Connection) -> Result<()> {
        // In-memory databases report "memory" and ignore WAL
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    /// Filesystem location, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database lock poisoned".to_string()))
    }
}

fn namespace_of(key: &str) -> &str {
    key.split_once('/').map_or("", |(namespace, _)| namespace)
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let now = crate::util::unix_millis_now();
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at, namespace) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now, namespace_of(key)],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.connection()?;
        let prefix_len = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv_entries
             WHERE (?1 = '' OR namespace = ?1) AND substr(key, 1, ?2) = ?3
             ORDER BY key",
        )?;

        let entries = stmt
            .query_map(
                params![namespace_of(prefix), prefix_len, prefix],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{ACTIONS_PREFIX, SETTINGS_KEY};
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_put_get_delete() {
        let db = Database::open_in_memory().unwrap();
        db.put(SETTINGS_KEY, "{\"a\":1}").unwrap();
        db.put(SETTINGS_KEY, "{\"a\":2}").unwrap();
        assert_eq!(db.get(SETTINGS_KEY).unwrap().as_deref(), Some("{\"a\":2}"));

        db.delete(SETTINGS_KEY).unwrap();
        assert!(db.get(SETTINGS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_list_prefix() {
        let db = Database::open_in_memory().unwrap();
        db.put("actions/b", "2").unwrap();
        db.put("actions/a", "1").unwrap();
        db.put("storage/a", "3").unwrap();
        assert_eq!(db.list_prefix("stor").unwrap().len(), 1);

        let listed = db.list_prefix(ACTIONS_PREFIX).unwrap();
        assert_eq!(
            listed,
            vec![
                ("actions/a".to_string(), "1".to_string()),
                ("actions/b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("sitesync.db");

        {
            let db = Database::open(&path).unwrap();
            db.put("actions/x", "persisted").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get("actions/x").unwrap().as_deref(), Some("persisted"));
        assert_eq!(db.path(), Some(path.as_path()));
    }
}
