use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::persistence::load_state;
use crate::query;
use crate::writer::SnapshotWriter;
use crate::{Note, Persistence, PersistedState, STORAGE_KEY};

/// The single owner of all notes plus the transient list filters.
///
/// Every mutation publishes the full durable state to the persistence
/// backend without waiting for the write. The in-memory state stays
/// authoritative when a write fails.
pub struct NoteStore {
    state: PersistedState,
    query: String,
    tag_filter: Option<String>,
    revision: u64,
    writer: Option<SnapshotWriter>,
}

impl Default for NoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteStore {
    /// An empty store that is never persisted.
    pub fn new() -> Self {
        Self::from_state(PersistedState::default())
    }

    /// A store seeded with `state` that is never persisted.
    pub fn from_state(state: PersistedState) -> Self {
        Self {
            state,
            query: String::new(),
            tag_filter: None,
            revision: 0,
            writer: None,
        }
    }

    /// Load the saved notes from `persistence` and keep saving to it.
    ///
    /// Must be called from within a tokio runtime. Missing or unreadable
    /// saved state yields an empty store.
    pub async fn open<P: Persistence + 'static>(persistence: P) -> Self {
        Self::open_with_key(persistence, STORAGE_KEY).await
    }

    /// Like [`NoteStore::open`] with a custom storage key.
    pub async fn open_with_key<P: Persistence + 'static>(persistence: P, key: &str) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(persistence);
        let state = load_state(persistence.as_ref(), key).await;
        let mut store = Self::from_state(state);
        store.writer = Some(SnapshotWriter::spawn(persistence, key.to_string()));
        store
    }

    /// Create an empty note at the head of the ordering and return its id.
    pub fn create_note(&mut self) -> String {
        let id = self.fresh_id();
        let note = Note::empty(id.clone(), Utc::now());
        self.state.notes_by_id.insert(id.clone(), note);
        self.state.note_ids.insert(0, id.clone());
        debug!(id = %id, "created note");
        self.persist();
        id
    }

    /// Insert `note`, or replace the stored note with the same id.
    ///
    /// Replacement is whole-record and keeps the note's position in the
    /// ordering. Callers set `updated_at` and normalize tags themselves.
    pub fn upsert_note(&mut self, note: Note) {
        let id = note.id.clone();
        if self.state.notes_by_id.insert(id.clone(), note).is_none() {
            self.state.note_ids.insert(0, id);
        }
        self.persist();
    }

    /// Delete a note. Unknown ids are a no-op; returns whether a note was
    /// removed.
    pub fn delete_note(&mut self, id: &str) -> bool {
        if self.state.notes_by_id.remove(id).is_none() {
            return false;
        }
        self.state.note_ids.retain(|x| x != id);
        debug!(id, "deleted note");
        self.persist();
        true
    }

    pub fn get_note(&self, id: &str) -> Option<&Note> {
        self.state.notes_by_id.get(id)
    }

    pub fn set_query(&mut self, text: impl Into<String>) {
        self.query = text.into();
    }

    pub fn set_tag_filter(&mut self, tag: Option<String>) {
        self.tag_filter = tag;
    }

    /// Select `tag`, or go back to showing all notes if it is already
    /// selected.
    pub fn toggle_tag_filter(&mut self, tag: &str) {
        if self.tag_filter.as_deref() == Some(tag) {
            self.tag_filter = None;
        } else {
            self.tag_filter = Some(tag.to_string());
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn tag_filter(&self) -> Option<&str> {
        self.tag_filter.as_deref()
    }

    /// Notes matching the current query and tag filter, in display order.
    pub fn visible_notes(&self) -> Vec<&Note> {
        query::visible_notes(&self.state, &self.query, self.tag_filter.as_deref())
    }

    /// All distinct tags across every note.
    pub fn all_tags(&self) -> Vec<String> {
        query::all_tags(&self.state)
    }

    /// The durable part of the store.
    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.note_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.note_ids.is_empty()
    }

    /// Number of mutations published for saving since the store was built.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Wait for the last published state to be written, then stop saving.
    pub async fn close(mut self) {
        if let Some(writer) = self.writer.take() {
            writer.close().await;
        }
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::now_v7().to_string();
            if !self.state.notes_by_id.contains_key(&id) {
                return id;
            }
        }
    }

    fn persist(&mut self) {
        self.revision += 1;
        let Some(writer) = &self.writer else {
            return;
        };
        match self.state.to_document() {
            Ok(document) => writer.publish(document),
            Err(e) => warn!(error = %e, "failed to serialize notes, not saved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryPersistence;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;

    fn consistent(store: &NoteStore) -> bool {
        let s = store.state();
        s.note_ids.len() == s.notes_by_id.len()
            && s.note_ids.iter().all(|id| s.notes_by_id.contains_key(id))
    }

    #[test]
    fn test_create_note_ids_unique_and_prepended() {
        let mut store = NoteStore::new();
        let ids: Vec<String> = (0..50).map(|_| store.create_note()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 50);
        assert_eq!(store.state().note_ids[0], ids[49]);
        assert!(consistent(&store));
    }

    #[test]
    fn test_created_note_is_empty() {
        let mut store = NoteStore::new();
        let id = store.create_note();
        let note = store.get_note(&id).unwrap();
        assert!(note.title.is_empty() && note.body.is_empty() && note.tags.is_empty());
        assert!(!note.pinned);
        assert!(note.updated_at >= note.created_at);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut store = NoteStore::new();
        let first = store.create_note();
        let second = store.create_note();

        let mut edited = store.get_note(&first).unwrap().clone();
        edited.title = "changed".into();
        edited.updated_at = edited.updated_at + Duration::seconds(1);
        store.upsert_note(edited.clone());

        assert_eq!(store.get_note(&first), Some(&edited));
        assert_eq!(store.state().note_ids, vec![second, first]);
    }

    #[test]
    fn test_upsert_unknown_inserts_at_head() {
        let mut store = NoteStore::new();
        let existing = store.create_note();
        let note = Note::empty("imported", Utc.timestamp_millis_opt(1).unwrap());
        store.upsert_note(note);
        assert_eq!(store.state().note_ids, vec!["imported".to_string(), existing]);
        assert!(consistent(&store));
    }

    #[test]
    fn test_upsert_twice_is_idempotent() {
        let mut store = NoteStore::new();
        let note = Note::empty("n", Utc::now());
        store.upsert_note(note.clone());
        let once = store.state().clone();
        store.upsert_note(note);
        assert_eq!(store.state(), &once);
        assert_eq!(store.state().note_ids.iter().filter(|id| *id == "n").count(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = NoteStore::new();
        let keep = store.create_note();
        let gone = store.create_note();

        assert!(store.delete_note(&gone));
        let once = store.state().clone();
        let revision = store.revision();
        assert!(!store.delete_note(&gone));
        assert_eq!(store.state(), &once);
        assert_eq!(store.revision(), revision);
        assert_eq!(store.state().note_ids, vec![keep]);
        assert!(store.get_note(&gone).is_none());
    }

    #[test]
    fn test_filter_setters_do_not_persist() {
        let mut store = NoteStore::new();
        store.set_query("eggs");
        store.set_tag_filter(Some("work".into()));
        assert_eq!(store.query(), "eggs");
        assert_eq!(store.tag_filter(), Some("work"));
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_toggle_tag_filter() {
        let mut store = NoteStore::new();
        store.toggle_tag_filter("work");
        assert_eq!(store.tag_filter(), Some("work"));
        store.toggle_tag_filter("home");
        assert_eq!(store.tag_filter(), Some("home"));
        store.toggle_tag_filter("home");
        assert_eq!(store.tag_filter(), None);
    }

    #[test]
    fn test_visible_notes_uses_store_filters() {
        let mut store = NoteStore::new();
        let id = store.create_note();
        let mut note = store.get_note(&id).unwrap().clone();
        note.tags = vec!["work".into()];
        store.upsert_note(note);
        store.create_note();

        store.set_tag_filter(Some("work".into()));
        let visible = store.visible_notes();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, id);
        assert_eq!(store.all_tags(), vec!["work"]);
    }

    #[tokio::test]
    async fn test_round_trip_through_persistence() {
        let mem = MemoryPersistence::new();
        let mut store = NoteStore::open(mem.clone()).await;
        let a = store.create_note();
        let b = store.create_note();
        let mut note = store.get_note(&a).unwrap().clone();
        note.title = "Grocery List".into();
        note.tags = vec!["home".into()];
        note.pinned = true;
        store.upsert_note(note);
        store.set_query("grocery");
        store.set_tag_filter(Some("home".into()));
        let saved = store.state().clone();
        store.close().await;

        let reopened = NoteStore::open(mem).await;
        assert_eq!(reopened.state(), &saved);
        assert_eq!(reopened.state().note_ids, vec![b, a]);
        assert_eq!(reopened.query(), "");
        assert_eq!(reopened.tag_filter(), None);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory_state() {
        let mem = MemoryPersistence::new();
        let mut store = NoteStore::open(mem.clone()).await;
        mem.set_failing(true);
        let id = store.create_note();
        assert!(store.get_note(&id).is_some());
        store.close().await;
        assert_eq!(mem.save_count(), 0);
    }

    #[tokio::test]
    async fn test_open_with_unreadable_document_starts_empty() {
        let mem = MemoryPersistence::new();
        mem.insert_document(STORAGE_KEY, r#"{"version":99,"state":{}}"#);
        let store = NoteStore::open(mem).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_last_mutation_is_durable() {
        let mem = MemoryPersistence::new();
        let mut store = NoteStore::open(mem.clone()).await;
        let ids: Vec<String> = (0..5).map(|_| store.create_note()).collect();
        store.delete_note(&ids[0]);
        let expected = store.state().to_document().unwrap();
        store.close().await;
        assert_eq!(mem.document(STORAGE_KEY), Some(expected));
    }
}
