//! Derived, read-only views over the note collection.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::{Note, PersistedState};

/// Notes to display for the given search text and tag filter.
///
/// Pinned notes come first, then most recently updated. Notes with equal
/// pin state and `updated_at` keep their relative position in `note_ids`
/// (newest created first), so the order is stable across re-derivations.
pub fn visible_notes<'a>(
    state: &'a PersistedState,
    query: &str,
    tag_filter: Option<&str>,
) -> Vec<&'a Note> {
    // Ids without a map entry are skipped
    let mut notes: Vec<&Note> = state
        .note_ids
        .iter()
        .filter_map(|id| state.notes_by_id.get(id))
        .collect();

    // sort_by is stable
    notes.sort_by(|a, b| display_order(a, b));

    let needle = normalize(query);
    notes.retain(|note| matches_tag(note, tag_filter) && matches_text(note, &needle));
    notes
}

/// Every distinct tag across all notes, in dictionary order.
///
/// This approximates locale collation rather than implementing it: tags
/// compare by their `to_lowercase` form, and when two differ only in case
/// the lowercase one sorts first. Accents, digits and punctuation order by
/// code point. Always computed over the full collection, never the
/// filtered view.
pub fn all_tags(state: &PersistedState) -> Vec<String> {
    let distinct: BTreeSet<&str> = state
        .notes_by_id
        .values()
        .flat_map(|note| note.tags.iter().map(String::as_str))
        .collect();

    let mut tags: Vec<String> = distinct.into_iter().map(str::to_string).collect();
    tags.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| b.cmp(a))
    });
    tags
}

fn display_order(a: &Note, b: &Note) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn matches_tag(note: &Note, tag_filter: Option<&str>) -> bool {
    match tag_filter {
        Some(tag) => note.tags.iter().any(|t| t == tag),
        None => true,
    }
}

fn matches_text(note: &Note, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let haystack = format!("{} {} {}", note.title, note.body, note.tags.join(" ")).to_lowercase();
    haystack.contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn note(id: &str, pinned: bool, updated_ms: i64) -> Note {
        let created = Utc.timestamp_millis_opt(0).unwrap();
        Note {
            pinned,
            updated_at: Utc.timestamp_millis_opt(updated_ms).unwrap(),
            ..Note::empty(id, created)
        }
    }

    fn state(notes: Vec<Note>) -> PersistedState {
        PersistedState {
            note_ids: notes.iter().map(|n| n.id.clone()).collect(),
            notes_by_id: notes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    fn ids(notes: &[&Note]) -> Vec<String> {
        notes.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_pinned_first_then_recent() {
        let s = state(vec![note("A", true, 10), note("B", false, 50), note("C", true, 30)]);
        assert_eq!(ids(&visible_notes(&s, "", None)), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_ties_keep_ordering_list_position() {
        let s = state(vec![note("x", false, 5), note("y", false, 5), note("z", false, 5)]);
        let first = ids(&visible_notes(&s, "", None));
        assert_eq!(first, vec!["x", "y", "z"]);
        assert_eq!(ids(&visible_notes(&s, "", None)), first);
    }

    #[test]
    fn test_dangling_ids_are_skipped() {
        let mut s = state(vec![note("a", false, 1)]);
        s.note_ids.insert(0, "ghost".into());
        assert_eq!(ids(&visible_notes(&s, "", None)), vec!["a"]);
    }

    #[test]
    fn test_tag_filter_exact_and_case_sensitive() {
        let mut work = note("work", false, 3);
        work.tags = vec!["work".into()];
        let mut home = note("home", false, 2);
        home.tags = vec!["home".into()];
        let mut upper = note("upper", false, 4);
        upper.tags = vec!["Work".into()];
        let s = state(vec![work, home, upper, note("none", false, 1)]);

        assert_eq!(ids(&visible_notes(&s, "", Some("work"))), vec!["work"]);
        assert_eq!(visible_notes(&s, "", None).len(), 4);
        assert!(visible_notes(&s, "", Some("wor")).is_empty());
    }

    #[test]
    fn test_text_search_case_insensitive_substring() {
        let mut n = note("g", false, 1);
        n.title = "Grocery List".into();
        n.body = "milk, eggs".into();
        let s = state(vec![n]);

        assert_eq!(visible_notes(&s, "EGGS", None).len(), 1);
        assert_eq!(visible_notes(&s, "  grocery ", None).len(), 1);
        assert!(visible_notes(&s, "bread", None).is_empty());
        assert_eq!(visible_notes(&s, "   ", None).len(), 1);
    }

    #[test]
    fn test_text_search_covers_tags() {
        let mut n = note("t", false, 1);
        n.tags = vec!["Errands".into(), "weekend".into()];
        let s = state(vec![n]);
        assert_eq!(visible_notes(&s, "errands week", None).len(), 1);
    }

    #[test]
    fn test_filters_combine() {
        let mut a = note("a", false, 2);
        a.title = "plan trip".into();
        a.tags = vec!["travel".into()];
        let mut b = note("b", false, 1);
        b.title = "plan budget".into();
        b.tags = vec!["money".into()];
        let s = state(vec![a, b]);
        assert_eq!(ids(&visible_notes(&s, "plan", Some("money"))), vec!["b"]);
    }

    #[test]
    fn test_all_tags_distinct_sorted() {
        let mut a = note("a", false, 1);
        a.tags = vec!["work".into(), "Home".into()];
        let mut b = note("b", false, 2);
        b.tags = vec!["apple".into(), "work".into(), "home".into()];
        let s = state(vec![a, b]);
        assert_eq!(all_tags(&s), vec!["apple", "home", "Home", "work"]);
    }

    #[test]
    fn test_all_tags_ignores_ordering_list() {
        let mut a = note("a", false, 1);
        a.tags = vec!["solo".into()];
        let mut s = state(vec![a]);
        s.note_ids.clear();
        assert_eq!(all_tags(&s), vec!["solo"]);
    }
}
