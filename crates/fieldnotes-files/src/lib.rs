//! File-based storage implementation for fieldnotes.
//!
//! Each key is one JSON document on disk:
//!
//! ```text
//! .fieldnotes/
//!   .owner                   # Held while a process has the notes open
//!   .lock                    # Lock file for atomic operations
//!   field-notes-v1.json
//! ```
//!
//! Disk work runs on tokio's blocking pool, so a contended lock or a slow
//! fsync never stalls the runtime driving the store.

use fieldnotes_core::{Error, Persistence};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const OWNER_FILE: &str = ".owner";

/// File-based persistence backend.
///
/// Owns its directory for as long as it lives: a second `open` on the same
/// directory, from this process or another, fails with [`Error::Locked`].
pub struct FilesPersistence {
    dir: Arc<DataDir>,
    _owner: FileLock,
}

impl FilesPersistence {
    /// Open (creating if needed) a storage directory and claim it.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("Failed to create data dir: {}", e)))?;

        let owner = claim(&root)?;
        debug!(root = %root.display(), "claimed notes directory");

        Ok(Self {
            dir: Arc::new(DataDir { root }),
            _owner: owner,
        })
    }

    pub fn root(&self) -> &Path {
        &self.dir.root
    }

    /// Run `f` on the blocking pool while holding the directory lock.
    async fn locked<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&DataDir) -> Result<T, Error> + Send + 'static,
    {
        let dir = Arc::clone(&self.dir);
        tokio::task::spawn_blocking(move || {
            let _lock = dir.lock()?;
            f(dir.as_ref())
        })
        .await
        .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
    }
}

/// Take the owner lock for `root` without waiting.
fn claim(root: &Path) -> Result<FileLock, Error> {
    let path = root.join(OWNER_FILE);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| Error::Storage(format!("Failed to open owner file: {}", e)))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(FileLock { file }),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(Error::Locked(format!(
                "notes in {} are open in another process",
                root.display()
            )))
        }
        Err(e) => Err(Error::Storage(format!("Failed to acquire owner lock: {}", e))),
    }
}

/// The storage directory as seen from blocking tasks.
struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Acquire an exclusive lock on the storage directory.
    fn lock(&self) -> Result<FileLock, Error> {
        let lock_path = self.root.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| Error::Storage(format!("Failed to open lock file: {}", e)))?;

        file.lock_exclusive()
            .map_err(|e| Error::Storage(format!("Failed to acquire lock: {}", e)))?;

        Ok(FileLock { file })
    }

    /// Get the path of the document stored under `key`.
    fn document_path(&self, key: &str) -> Result<PathBuf, Error> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.json", key)))
    }

    /// Read a document from disk.
    fn read_document(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.document_path(key)?;

        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    /// Write a document to disk atomically.
    fn write_document(&self, key: &str, document: &str) -> Result<(), Error> {
        let path = self.document_path(key)?;
        let temp_path = self.root.join(format!("{}.json.tmp", key));

        // Write to temp file
        let mut file = File::create(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;

        file.write_all(document.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to write temp file: {}", e)))?;

        file.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync temp file: {}", e)))?;

        // Atomic rename
        fs::rename(&temp_path, &path)
            .map_err(|e| Error::Storage(format!("Failed to rename temp file: {}", e)))?;

        debug!(path = %path.display(), bytes = document.len(), "wrote document");
        Ok(())
    }
}

/// Keys become file names, so keep them to a safe alphabet.
fn validate_key(key: &str) -> Result<(), Error> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid storage key: {:?}", key)))
    }
}

/// RAII guard for file locking.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[async_trait::async_trait]
impl Persistence for FilesPersistence {
    async fn load(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        self.locked(move |dir| dir.read_document(&key)).await
    }

    async fn save(&self, key: &str, document: &str) -> Result<(), Error> {
        let key = key.to_string();
        let document = document.to_string();
        self.locked(move |dir| dir.write_document(&key, &document)).await
    }
}
