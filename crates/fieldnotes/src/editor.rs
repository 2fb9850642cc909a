//! Line-driven note editor on top of an autosave session.

use anyhow::{Context, Result};
use fieldnotes_core::{EditSession, NoteStore, SaveStatus};
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line of editor input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditCommand {
    Title(String),
    Body(String),
    Append(String),
    Tags(String),
    Pin,
    Unpin,
    Done,
}

pub const EDITOR_HELP: &str = "commands: title <text> | body <text> | append <text> | tags <a, b> | pin | unpin | done";

pub fn parse_edit_command(line: &str) -> Option<EditCommand> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (word, rest) = match line.split_once(' ') {
        Some((word, rest)) => (word, rest),
        None => (line, ""),
    };
    let command = match word {
        "title" => EditCommand::Title(rest.to_string()),
        "body" => EditCommand::Body(rest.to_string()),
        "append" => EditCommand::Append(rest.to_string()),
        "tags" => EditCommand::Tags(rest.to_string()),
        "pin" if rest.trim().is_empty() => EditCommand::Pin,
        "unpin" if rest.trim().is_empty() => EditCommand::Unpin,
        "done" if rest.trim().is_empty() => EditCommand::Done,
        _ => return None,
    };
    Some(command)
}

/// Apply a command to the session. Returns false for `done`.
pub fn apply(session: &mut EditSession, command: EditCommand) -> bool {
    match command {
        EditCommand::Title(title) => session.set_title(title),
        EditCommand::Body(body) => session.set_body(body),
        EditCommand::Append(line) => {
            let body = if session.body().is_empty() {
                line
            } else {
                format!("{}\n{}", session.body(), line)
            };
            session.set_body(body);
        }
        EditCommand::Tags(tags) => session.set_tags_text(tags),
        EditCommand::Pin => session.set_pinned(true),
        EditCommand::Unpin => session.set_pinned(false),
        EditCommand::Done => return false,
    }
    true
}

/// Edit interactively from stdin until `done` or end of input.
///
/// Edits are autosaved after the debounce delay; the final state is
/// committed on exit. Returns whether anything was written.
pub async fn run_interactive(store: &mut NoteStore, mut session: EditSession) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut wrote = false;
    let mut shown = SaveStatus::Idle;

    eprintln!("{}", EDITOR_HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_edit_command(&line) {
                    Some(command) => {
                        if !apply(&mut session, command) {
                            break;
                        }
                    }
                    None => eprintln!("Unknown command: {}", line.trim()),
                }
            }
            event = session.next_event() => {
                wrote |= session.handle(event, store);
            }
        }

        if session.status() != shown {
            shown = session.status();
            eprintln!("{}", shown.label());
        }
    }

    wrote |= session.finish(store);
    Ok(wrote)
}
