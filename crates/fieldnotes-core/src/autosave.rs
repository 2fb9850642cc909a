//! Debounced autosave for a single note's edit session.
//!
//! Field edits only touch the session's local draft. Once edits pause for
//! the debounce delay the draft is compared with what was last committed and
//! written to the store only if the content actually changed.
//!
//! The session never owns the store. An event loop drives it:
//!
//! ```no_run
//! # use fieldnotes_core::{AutosaveConfig, EditSession, NoteStore};
//! # async fn run(store: &mut NoteStore, id: &str) {
//! let Some(mut session) = EditSession::open(store, id, &AutosaveConfig::default()) else {
//!     return; // note not found
//! };
//! session.set_title("Groceries");
//! let event = session.next_event().await;
//! session.handle(event, store);
//! session.finish(store);
//! # }
//! ```

use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::tags::{format_tags, parse_tags};
use crate::{Note, NoteContent, NoteStore};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(600);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// How long edits must pause before a commit is attempted.
    pub debounce: Duration,
    /// How long "saving" is shown before switching to "saved".
    pub settle: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            settle: DEFAULT_SETTLE,
        }
    }
}

/// Save indicator for the surrounding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
}

impl SaveStatus {
    pub fn label(self) -> &'static str {
        match self {
            SaveStatus::Idle => "",
            SaveStatus::Saving => "Saving...",
            SaveStatus::Saved => "Saved",
        }
    }
}

/// A cancellable, re-armable deadline.
///
/// Arming replaces any pending deadline, so only the last of a burst of
/// arms ever fires.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve once the pending deadline passes, disarming it. Never
    /// resolves while unarmed.
    ///
    /// Cancel safe: dropping the future leaves the deadline in place.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// What woke an [`EditSession`] up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveEvent {
    /// Edits paused long enough; try to commit.
    CommitDue,
    /// The "saving" indicator has been shown long enough.
    Settled,
}

/// Local, unsaved copy of one note being edited.
#[derive(Debug)]
pub struct EditSession {
    original: Note,
    title: String,
    body: String,
    tags_text: String,
    pinned: bool,
    last_saved: NoteContent,
    status: SaveStatus,
    debounce: Debouncer,
    settle: Debouncer,
}

impl EditSession {
    /// Start editing note `id`. Returns `None` if there is no such note,
    /// which the caller should treat as a terminal "not found" state.
    pub fn open(store: &NoteStore, id: &str, config: &AutosaveConfig) -> Option<Self> {
        let note = store.get_note(id)?.clone();
        Some(Self {
            title: note.title.clone(),
            body: note.body.clone(),
            tags_text: format_tags(&note.tags),
            pinned: note.pinned,
            last_saved: note.content(),
            original: note,
            status: SaveStatus::Idle,
            debounce: Debouncer::new(config.debounce),
            settle: Debouncer::new(config.settle),
        })
    }

    pub fn note_id(&self) -> &str {
        &self.original.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn tags_text(&self) -> &str {
        &self.tags_text
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    /// Whether a debounced commit is waiting to fire.
    pub fn has_pending_commit(&self) -> bool {
        self.debounce.is_armed()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.debounce.arm();
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
        self.debounce.arm();
    }

    pub fn set_tags_text(&mut self, tags_text: impl Into<String>) {
        self.tags_text = tags_text.into();
        self.debounce.arm();
    }

    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
        self.debounce.arm();
    }

    pub fn toggle_pinned(&mut self) {
        self.set_pinned(!self.pinned);
    }

    /// Content of the draft as it would be committed.
    pub fn draft_content(&self) -> NoteContent {
        NoteContent {
            title: self.title.clone(),
            body: self.body.clone(),
            tags: parse_tags(&self.tags_text),
            pinned: self.pinned,
        }
    }

    /// Whether the draft differs from the last committed content.
    pub fn is_dirty(&self) -> bool {
        self.draft_content() != self.last_saved
    }

    /// The record a commit would write, stamped with the current time.
    pub fn build_next_note(&self) -> Note {
        let content = self.draft_content();
        Note {
            id: self.original.id.clone(),
            title: content.title,
            body: content.body,
            tags: content.tags,
            pinned: content.pinned,
            created_at: self.original.created_at,
            updated_at: Utc::now().max(self.original.created_at),
        }
    }

    /// Commit the draft if its content changed since the last commit.
    ///
    /// Supersedes any pending debounce. Returns whether anything was
    /// written.
    pub fn commit_if_dirty(&mut self, store: &mut NoteStore) -> bool {
        self.debounce.cancel();

        let content = self.draft_content();
        if content == self.last_saved {
            return false;
        }

        self.status = SaveStatus::Saving;
        store.upsert_note(self.build_next_note());
        self.last_saved = content;
        self.settle.arm();
        debug!(id = %self.original.id, "autosaved note");
        true
    }

    /// Wait for the next timer to fire.
    ///
    /// Pending forever when neither a commit nor a status change is due.
    pub async fn next_event(&mut self) -> AutosaveEvent {
        tokio::select! {
            _ = self.debounce.fired() => AutosaveEvent::CommitDue,
            _ = self.settle.fired() => AutosaveEvent::Settled,
        }
    }

    /// Apply a timer event. Returns whether the store was written.
    pub fn handle(&mut self, event: AutosaveEvent, store: &mut NoteStore) -> bool {
        match event {
            AutosaveEvent::CommitDue => self.commit_if_dirty(store),
            AutosaveEvent::Settled => {
                if self.status == SaveStatus::Saving {
                    self.status = SaveStatus::Saved;
                }
                false
            }
        }
    }

    /// End the session, committing any edit still inside the debounce
    /// window. Returns whether anything was written.
    pub fn finish(mut self, store: &mut NoteStore) -> bool {
        self.commit_if_dirty(store)
    }
}
