//! Storage port for shotsync
//!
//! The engine only talks to a flat string key-value namespace. Concrete
//! backends: in-memory map, SQLite (WAL mode) and Fjall LSM-tree.

use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};

/// Shared handle to a storage backend
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Generic key-value store interface
///
/// All storage backends must implement this trait. Values are UTF-8 JSON
/// documents; the store does not interpret them.
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// List every key in the namespace
    fn keys(&self) -> Result<Vec<String>>;

    /// List keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Check if a key exists
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Make completed writes durable (no-op for backends that already are)
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory store with an optional byte quota
///
/// The quota mimics browser storage limits: a write that would push the total
/// size (keys + values) past the limit fails and leaves the store unchanged.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `bytes` total
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota: Some(bytes),
        }
    }

    /// Total bytes currently stored
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .map(|m| m.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }

    fn poisoned() -> Error {
        Error::Storage("memory store lock poisoned".to_string())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;

        if let Some(limit) = self.quota {
            let current: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let next = current - replaced + key.len() + value.len();
            if next > limit {
                return Err(Error::Storage(format!(
                    "Quota exceeded writing '{}': {} of {} bytes",
                    key, next, limit
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.keys().cloned().collect())
    }
}

/// SQLite-backed store (single `kv` table, WAL journal)
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            Error::Storage(format!("Failed to open SQLite database at {:?}: {}", path, e))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sqlite_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sqlite_err)?;
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) WITHOUT ROWID;",
        )
        .map_err(sqlite_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("sqlite connection lock poisoned".to_string()))
    }
}

fn sqlite_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", e))
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(sqlite_err)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])
            .map_err(sqlite_err)?;
        Ok(removed > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv").map_err(sqlite_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sqlite_err)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(sqlite_err)?);
        }
        Ok(keys)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1")
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(rusqlite::params![prefix, prefix.len() as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(sqlite_err)?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(sqlite_err)?);
        }
        Ok(keys)
    }
}

/// Fjall LSM-tree store
pub struct FjallStore {
    db: fjall::Database,
    entries: fjall::Keyspace,
}

impl FjallStore {
    /// Open or create a store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let db = fjall::Database::builder(path)
            .open()
            .map_err(|e| Error::Storage(format!("Failed to open fjall store: {}", e)))?;

        let entries = db
            .keyspace("kv", || fjall::KeyspaceCreateOptions::default())
            .map_err(|e| Error::Storage(format!("Failed to open kv keyspace: {}", e)))?;

        Ok(Self { db, entries })
    }

    /// Persist data to disk
    pub fn persist(&self) -> Result<()> {
        self.db
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| Error::Storage(format!("Failed to persist: {}", e)))
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .entries
            .get(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Get failed: {}", e)))?;

        match value {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| Error::Storage(format!("Invalid UTF-8 under '{}': {}", key, e))),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| Error::Storage(format!("Put failed: {}", e)))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let existed = self.contains(key)?;
        if existed {
            self.entries
                .remove(key.as_bytes())
                .map_err(|e| Error::Storage(format!("Delete failed: {}", e)))?;
        }
        Ok(existed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for guard in self.entries.iter() {
            let key = guard
                .key()
                .map_err(|e| Error::Storage(format!("Iteration failed: {}", e)))?;
            keys.push(String::from_utf8_lossy(key.as_ref()).into_owned());
        }
        Ok(keys)
    }

    fn flush(&self) -> Result<()> {
        self.persist()
    }
}
