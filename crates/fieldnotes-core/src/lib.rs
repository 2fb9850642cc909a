//! Fieldnotes core library - note store, queries and autosave.
//!
//! This crate does no file I/O; durable storage is plugged in through the
//! [`Persistence`] trait.

mod autosave;
mod error;
mod note;
mod persistence;
mod query;
mod store;
mod tags;
mod writer;

pub use autosave::{
    AutosaveConfig, AutosaveEvent, Debouncer, EditSession, SaveStatus, DEFAULT_DEBOUNCE,
    DEFAULT_SETTLE,
};
pub use error::Error;
pub use note::{Note, NoteContent, NoteSummary, UNTITLED};
pub use persistence::{
    load_state, MemoryPersistence, PersistedState, Persistence, SCHEMA_VERSION, STORAGE_KEY,
};
pub use query::{all_tags, visible_notes};
pub use store::NoteStore;
pub use tags::{format_tags, parse_tags};
