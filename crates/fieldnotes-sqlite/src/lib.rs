//! SQLite implementation of the fieldnotes persistence trait.
//!
//! Queries run on tokio's blocking pool. A database opened from a path is
//! claimed through a `<path>.lock` file next to it for as long as the
//! backend lives.

mod migrations;

pub use migrations::SCHEMA_VERSION;

use fieldnotes_core::{Error, Persistence};
use fs2::FileExt;
use migrations::get_pending_migrations;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// SQLite-backed key-value persistence.
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
    _owner: Option<OwnerLock>,
}

impl SqlitePersistence {
    /// Open a database at the given path and run any pending migrations.
    ///
    /// Fails with [`Error::Locked`] while another backend has the same
    /// database open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let owner = OwnerLock::acquire(path)?;
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        Self::with_connection(conn, Some(owner))
    }

    /// Open an in-memory database and run migrations.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, owner: Option<OwnerLock>) -> Result<Self, Error> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            _owner: owner,
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        lock_connection(&self.conn)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = lock_connection(&conn)?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("database task failed: {}", e)))?
    }

    /// Current schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i64, Error> {
        let conn = self.conn()?;
        Self::read_schema_version(&conn)
    }

    fn read_schema_version(conn: &Connection) -> Result<i64, Error> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM _fieldnotes_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Run any pending database migrations.
    fn run_migrations(&self) -> Result<(), Error> {
        let conn = self.conn()?;

        // Ensure _fieldnotes_meta table exists
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _fieldnotes_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let current_version = Self::read_schema_version(&conn)?;

        // Already up to date
        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        for migration in get_pending_migrations(current_version) {
            for statement in migration.statements {
                conn.execute(statement, []).map_err(|e| {
                    Error::Storage(format!("Migration {} failed: {}", migration.name, e))
                })?;
            }
            debug!(version = migration.version, name = migration.name, "applied migration");
        }

        // Update schema version
        conn.execute(
            "INSERT OR REPLACE INTO _fieldnotes_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(())
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, Error> {
    conn.lock()
        .map_err(|e| Error::Internal(format!("connection lock poisoned: {}", e)))
}

/// Exclusive claim on a database file, released on drop.
///
/// [`SqlitePersistence::open`] holds one for its lifetime; take one
/// directly to keep the database closed to others without opening it.
pub struct OwnerLock {
    file: File,
}

impl OwnerLock {
    /// Claim `db_path` without waiting, failing with [`Error::Locked`] if
    /// someone else holds it.
    pub fn acquire(db_path: &Path) -> Result<Self, Error> {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&name)
            .map_err(|e| Error::Storage(format!("Failed to open owner file: {}", e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::Locked(format!(
                    "notes in {} are open in another process",
                    db_path.display()
                )))
            }
            Err(e) => Err(Error::Storage(format!("Failed to acquire owner lock: {}", e))),
        }
    }
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn load(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        self.blocking(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))
        })
        .await
    }

    async fn save(&self, key: &str, document: &str) -> Result<(), Error> {
        let key = key.to_string();
        let document = document.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, document],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }
}
