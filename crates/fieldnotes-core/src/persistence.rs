//! Durable storage for the note collection.
//!
//! The whole durable subset of the store is saved as one JSON document under
//! a fixed key. Backends only need to read and write opaque strings.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{parse_tags, Error, Note};

/// Key the note collection is stored under.
pub const STORAGE_KEY: &str = "field-notes-v1";

/// Version of the persisted document. Documents with any other version are
/// ignored on load.
pub const SCHEMA_VERSION: u32 = 1;

/// Key-value storage backend.
///
/// Implementations must be usable from a spawned task, so unlike a UI-bound
/// handle they are `Send + Sync`.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Load the document stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<String>, Error>;

    /// Replace the document stored under `key`.
    async fn save(&self, key: &str, document: &str) -> Result<(), Error>;
}

/// The part of the store that survives a restart.
///
/// Query text and tag filter are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub notes_by_id: BTreeMap<String, Note>,
    pub note_ids: Vec<String>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    state: &'a PersistedState,
}

#[derive(Deserialize)]
struct Document {
    version: u32,
    state: PersistedState,
}

impl PersistedState {
    /// Serialize into a versioned document.
    pub fn to_document(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&DocumentRef {
            version: SCHEMA_VERSION,
            state: self,
        })?)
    }

    /// Parse a versioned document. A version mismatch is an error.
    pub fn from_document(document: &str) -> Result<Self, Error> {
        let doc: Document = serde_json::from_str(document)?;
        if doc.version != SCHEMA_VERSION {
            return Err(Error::Validation(format!(
                "unsupported schema version {} (expected {})",
                doc.version, SCHEMA_VERSION
            )));
        }
        Ok(doc.state)
    }

    /// Bring a loaded state back in line with the note invariants.
    ///
    /// Map entries stored under the wrong key are dropped, dangling and
    /// duplicate ids are removed from the ordering, and notes missing from
    /// the ordering are put in front, newest first. Each note's tags are
    /// re-parsed (trimmed, non-empty, no duplicates) and an `updated_at`
    /// earlier than `created_at` is raised to it. Returns the number of
    /// fixes applied.
    pub fn repair(&mut self) -> usize {
        let mut fixes = 0;

        let before = self.notes_by_id.len();
        self.notes_by_id.retain(|key, note| *key == note.id);
        fixes += before - self.notes_by_id.len();

        for note in self.notes_by_id.values_mut() {
            let tags = parse_tags(&note.tags.join(","));
            if tags != note.tags {
                note.tags = tags;
                fixes += 1;
            }
            if note.updated_at < note.created_at {
                note.updated_at = note.created_at;
                fixes += 1;
            }
        }

        let mut seen = HashSet::new();
        let before = self.note_ids.len();
        self.note_ids
            .retain(|id| self.notes_by_id.contains_key(id) && seen.insert(id.clone()));
        fixes += before - self.note_ids.len();

        let mut orphans: Vec<&Note> = self
            .notes_by_id
            .values()
            .filter(|note| !seen.contains(&note.id))
            .collect();
        if !orphans.is_empty() {
            orphans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
            fixes += orphans.len();
            let mut ids: Vec<String> = orphans.into_iter().map(|n| n.id.clone()).collect();
            ids.append(&mut self.note_ids);
            self.note_ids = ids;
        }

        fixes
    }
}

/// Load the persisted state, falling back to an empty state.
///
/// Never fails: a missing, unreadable or outdated document all mean
/// "nothing saved yet".
pub async fn load_state(persistence: &dyn Persistence, key: &str) -> PersistedState {
    let document = match persistence.load(key).await {
        Ok(Some(document)) => document,
        Ok(None) => return PersistedState::default(),
        Err(e) => {
            warn!(key, error = %e, "failed to read saved notes, starting empty");
            return PersistedState::default();
        }
    };

    let mut state = match PersistedState::from_document(&document) {
        Ok(state) => state,
        Err(e) => {
            warn!(key, error = %e, "ignoring unreadable saved notes, starting empty");
            return PersistedState::default();
        }
    };

    let fixes = state.repair();
    if fixes > 0 {
        warn!(key, fixes, "repaired inconsistent saved notes");
    }
    info!(key, notes = state.note_ids.len(), "loaded saved notes");
    state
}

/// In-memory backend, useful for tests and ephemeral sessions.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    documents: Arc<Mutex<HashMap<String, String>>>,
    saves: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent load and save fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current raw document under `key`.
    pub fn document(&self, key: &str) -> Option<String> {
        self.documents
            .lock()
            .ok()
            .and_then(|docs| docs.get(key).cloned())
    }

    /// Seed a raw document under `key`.
    pub fn insert_document(&self, key: &str, document: impl Into<String>) {
        if let Ok(mut docs) = self.documents.lock() {
            docs.insert(key.to_string(), document.into());
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("memory backend set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self, key: &str) -> Result<Option<String>, Error> {
        self.check()?;
        let docs = self
            .documents
            .lock()
            .map_err(|e| Error::Internal(format!("memory backend poisoned: {}", e)))?;
        Ok(docs.get(key).cloned())
    }

    async fn save(&self, key: &str, document: &str) -> Result<(), Error> {
        self.check()?;
        let mut docs = self
            .documents
            .lock()
            .map_err(|e| Error::Internal(format!("memory backend poisoned: {}", e)))?;
        docs.insert(key.to_string(), document.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
