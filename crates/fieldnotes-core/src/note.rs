use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title shown for notes whose title is blank.
pub const UNTITLED: &str = "Untitled";

/// A full note with all fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A summary of a note for listing (truncated body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub body_preview: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub updated_at: DateTime<Utc>,
}

/// The user-editable part of a note.
///
/// Two notes with equal content differ at most in identity and timestamps,
/// so committing one over the other would be a redundant write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteContent {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub pinned: bool,
}

impl Note {
    /// A blank note created at `now`.
    pub fn empty(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            body: String::new(),
            tags: Vec::new(),
            pinned: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn content(&self) -> NoteContent {
        NoteContent {
            title: self.title.clone(),
            body: self.body.clone(),
            tags: self.tags.clone(),
            pinned: self.pinned,
        }
    }

    /// Title for display, falling back to [`UNTITLED`].
    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            UNTITLED
        } else {
            title
        }
    }

    /// Convert to summary with truncated body preview.
    pub fn to_summary(&self, max_len: usize) -> NoteSummary {
        // Convert newlines to spaces and take first max_len characters
        let normalized: String = self
            .body
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let trimmed = normalized.trim();

        let body_preview = match trimmed.char_indices().nth(max_len) {
            Some((cut, _)) => format!("{}...", &trimmed[..cut]),
            None => trimmed.to_string(),
        };

        let mut tags = self.tags.clone();
        tags.sort();

        NoteSummary {
            id: self.id.clone(),
            title: self.display_title().to_string(),
            body_preview,
            tags,
            pinned: self.pinned,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn note(title: &str, body: &str) -> Note {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        Note {
            title: title.to_string(),
            body: body.to_string(),
            ..Note::empty("n1", now)
        }
    }

    #[test]
    fn test_empty_note_has_blank_fields() {
        let now = Utc::now();
        let n = Note::empty("abc", now);
        assert_eq!(n.id, "abc");
        assert!(n.title.is_empty());
        assert!(n.body.is_empty());
        assert!(n.tags.is_empty());
        assert!(!n.pinned);
        assert_eq!(n.created_at, n.updated_at);
    }

    #[test]
    fn test_summary_untitled_and_preview() {
        let s = note("   ", "  line one\nline two  ").to_summary(80);
        assert_eq!(s.title, "Untitled");
        assert_eq!(s.body_preview, "line one line two");
    }

    #[test]
    fn test_summary_truncates_on_char_boundary() {
        let s = note("t", "héllo wörld").to_summary(4);
        assert_eq!(s.body_preview, "héll...");
    }

    #[test]
    fn test_summary_sorts_tags() {
        let mut n = note("t", "");
        n.tags = vec!["zeta".into(), "alpha".into()];
        assert_eq!(n.to_summary(80).tags, vec!["alpha", "zeta"]);
        // the note itself keeps its own order
        assert_eq!(n.tags, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_content_ignores_timestamps() {
        let a = note("same", "body");
        let mut b = a.clone();
        b.updated_at = b.updated_at + chrono::Duration::seconds(5);
        assert_eq!(a.content(), b.content());
        b.pinned = true;
        assert_ne!(a.content(), b.content());
    }
}
