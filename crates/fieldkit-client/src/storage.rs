//! Durable client-side key/value storage.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::ClientError;

/// Millisecond timestamp of the last install banner dismissal.
pub const INSTALL_DISMISSED_KEY: &str = "pwa-install-dismissed";
/// `"true"` once the app has been installed.
pub const INSTALLED_KEY: &str = "pwa-installed";
/// `"true"` once the iOS instructions were dismissed.
pub const IOS_INSTRUCTIONS_DISMISSED_KEY: &str = "pwa-ios-instructions-dismissed";

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// String key/value storage that survives reloads.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
    fn remove(&self, key: &str) -> Result<(), ClientError>;
}

// ==================== SQLite ====================

/// `rusqlite`-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, ClientError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        debug!(path = %path.display(), "Opened client storage");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, gone when dropped.
    pub fn open_in_memory() -> Result<Self, ClientError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T, ClientError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))?;
        Ok(f(&conn)?)
    }
}

fn init_schema(conn: &Connection) -> Result<(), ClientError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS client_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM client_storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let now = chrono::Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO client_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM client_storage WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }
}

// ==================== Memory ====================

/// Store that lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, ClientError> {
        self.values
            .lock()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ==================== Install preferences ====================

/// Typed view over the install-related keys.
#[derive(Clone)]
pub struct InstallPreferences {
    store: Arc<dyn DurableStore>,
}

impl InstallPreferences {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// When the install banner was last dismissed, in epoch milliseconds.
    /// Unparseable values count as never.
    pub fn dismissed_at(&self) -> Result<Option<i64>, ClientError> {
        Ok(self
            .store
            .get(INSTALL_DISMISSED_KEY)?
            .and_then(|v| v.parse().ok()))
    }

    pub fn record_dismissal(&self, at_millis: i64) -> Result<(), ClientError> {
        self.store.set(INSTALL_DISMISSED_KEY, &at_millis.to_string())
    }

    pub fn is_installed(&self) -> Result<bool, ClientError> {
        Ok(self.store.get(INSTALLED_KEY)?.as_deref() == Some("true"))
    }

    pub fn mark_installed(&self) -> Result<(), ClientError> {
        self.store.set(INSTALLED_KEY, "true")
    }

    /// The installed flag only goes away when explicitly reset.
    pub fn reset_installed(&self) -> Result<(), ClientError> {
        self.store.remove(INSTALLED_KEY)
    }

    pub fn ios_instructions_dismissed(&self) -> Result<bool, ClientError> {
        Ok(self.store.get(IOS_INSTRUCTIONS_DISMISSED_KEY)?.as_deref() == Some("true"))
    }

    pub fn dismiss_ios_instructions(&self) -> Result<(), ClientError> {
        self.store.set(IOS_INSTRUCTIONS_DISMISSED_KEY, "true")
    }
}
