//! Fieldnotes CLI - personal notes with tags, pins, search and autosave.

mod editor;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use fieldnotes_core::{AutosaveConfig, EditSession, Note, NoteStore, STORAGE_KEY};
use fieldnotes_files::FilesPersistence;
use fieldnotes_sqlite::{OwnerLock, SqlitePersistence};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DATA_DIR: &str = ".fieldnotes";
const SQLITE_FILE: &str = "notes.sqlite";
const PREVIEW_LEN: usize = 80;

#[derive(Parser)]
#[command(name = "fieldnotes", about = "Personal notes with tags, pins and search", version)]
struct Cli {
    /// Data directory (defaults to the nearest .fieldnotes directory)
    #[arg(long, global = true, env = "FIELDNOTES_DIR")]
    dir: Option<PathBuf>,
    /// Storage backend
    #[arg(long, global = true, env = "FIELDNOTES_BACKEND", value_enum, default_value_t = Backend::Files)]
    backend: Backend,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Files,
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new notes directory
    Init {
        /// Delete existing notes and reinitialize
        #[arg(long)]
        reinitialize: bool,
    },
    /// Create a new note
    New {
        #[command(flatten)]
        fields: FieldArgs,
        /// Continue in the interactive editor
        #[arg(short, long)]
        interactive: bool,
    },
    /// List notes, pinned first then most recently updated
    Ls {
        /// Only show notes containing this text (title, body or tags)
        #[arg(short, long)]
        query: Option<String>,
        /// Only show notes with this tag
        #[arg(short, long)]
        tag: Option<String>,
    },
    /// Show one or more notes
    Show {
        /// Comma-separated note IDs
        ids: String,
    },
    /// Edit a note
    Edit {
        /// Note ID
        id: String,
        #[command(flatten)]
        fields: FieldArgs,
        /// Edit line by line from stdin with autosave
        #[arg(short, long)]
        interactive: bool,
        /// Autosave delay after the last edit, in milliseconds
        #[arg(long, default_value_t = 600)]
        debounce_ms: u64,
    },
    /// Delete one or more notes
    Rm {
        /// Comma-separated note IDs
        ids: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// List all tags
    Tags,
}

#[derive(clap::Args, Default)]
struct FieldArgs {
    /// Note title
    #[arg(long)]
    title: Option<String>,
    /// Note body
    #[arg(long)]
    body: Option<String>,
    /// Comma-separated tags
    #[arg(long)]
    tags: Option<String>,
    /// Pin the note
    #[arg(long, conflicts_with = "unpin")]
    pin: bool,
    /// Unpin the note
    #[arg(long)]
    unpin: bool,
}

impl FieldArgs {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.tags.is_none() && !self.pin && !self.unpin
    }

    /// Feed the given fields into an edit session.
    fn apply(self, session: &mut EditSession) {
        if let Some(title) = self.title {
            session.set_title(title);
        }
        if let Some(body) = self.body {
            session.set_body(body);
        }
        if let Some(tags) = self.tags {
            session.set_tags_text(tags);
        }
        if self.pin {
            session.set_pinned(true);
        }
        if self.unpin {
            session.set_pinned(false);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("FIELDNOTES_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Find the .fieldnotes directory by searching up from current directory
fn find_data_dir() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join(DATA_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Get the data directory, or error if not initialized
fn get_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            bail!(
                "Notes directory {} does not exist. Run 'fieldnotes init' to create it.",
                dir.display()
            );
        }
        return Ok(dir);
    }
    match find_data_dir() {
        Some(dir) => Ok(dir),
        None => bail!("No .fieldnotes directory found. Run 'fieldnotes init' to initialize one."),
    }
}

fn has_saved_notes(dir: &Path) -> bool {
    dir.join(format!("{}.json", STORAGE_KEY)).exists() || dir.join(SQLITE_FILE).exists()
}

async fn open_store(dir: &Path, backend: Backend) -> Result<NoteStore> {
    debug!(dir = %dir.display(), ?backend, "opening notes");
    let store = match backend {
        Backend::Files => {
            let files = FilesPersistence::open(dir).context("Failed to open notes directory")?;
            NoteStore::open(files).await
        }
        Backend::Sqlite => {
            let db = SqlitePersistence::open(dir.join(SQLITE_FILE))
                .context("Failed to open SQLite database")?;
            NoteStore::open(db).await
        }
    };
    Ok(store)
}

fn parse_ids(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn print_row(note: &Note) {
    let summary = note.to_summary(PREVIEW_LEN);
    let pin = if summary.pinned { "📌 " } else { "" };
    let mut line = format!(
        "{}: {}{} ({})",
        summary.id,
        pin,
        summary.title,
        format_time(summary.updated_at)
    );
    if !summary.body_preview.is_empty() {
        line.push_str(&format!(" -- {}", summary.body_preview));
    }
    if !summary.tags.is_empty() {
        line.push_str(&format!("  #{}", summary.tags.join(" #")));
    }
    println!("{}", line);
}

fn print_note(note: &Note) {
    println!("# {}\n", note.display_title());
    println!("{}", note.body);
    println!("\n---\n");
    println!("Created: {}", format_time(note.created_at));
    println!("Last modified: {}", format_time(note.updated_at));
    if note.pinned {
        println!("Pinned: yes");
    }
    let mut tags = note.tags.clone();
    tags.sort();
    println!("Tags: {}", tags.join(","));
}

/// Ask before a destructive action. End of input counts as "no".
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N] ", prompt);
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

/// Files fieldnotes writes into a data directory.
fn owned_files() -> Vec<String> {
    let document = format!("{}.json", STORAGE_KEY);
    vec![
        format!("{}.tmp", document),
        document,
        ".lock".to_string(),
        SQLITE_FILE.to_string(),
        format!("{}-journal", SQLITE_FILE),
        format!("{}-wal", SQLITE_FILE),
        format!("{}-shm", SQLITE_FILE),
    ]
}

/// Delete saved notes from `dir`, leaving every other file in place.
fn remove_saved_notes(dir: &Path) -> Result<()> {
    // Claiming both backends fails while another process has the notes open
    let _files = FilesPersistence::open(dir).context("Failed to open notes directory")?;
    let sqlite = dir.join(SQLITE_FILE);
    let _db = if sqlite.exists() {
        Some(OwnerLock::acquire(&sqlite).context("Failed to open SQLite database")?)
    } else {
        None
    };

    for name in owned_files() {
        let path = dir.join(&name);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }
    Ok(())
}

fn init(dir: Option<PathBuf>, reinitialize: bool, backend: Backend) -> Result<()> {
    let dir = dir.unwrap_or_else(|| PathBuf::from(DATA_DIR));

    if dir.exists() {
        if reinitialize {
            remove_saved_notes(&dir)?;
        } else if has_saved_notes(&dir) {
            bail!("Notes are already initialized in {}. Use --reinitialize to delete and recreate.", dir.display());
        }
    }

    match backend {
        Backend::Files => {
            FilesPersistence::open(&dir).context("Failed to create notes directory")?;
        }
        Backend::Sqlite => {
            std::fs::create_dir_all(&dir).context("Failed to create notes directory")?;
            SqlitePersistence::open(dir.join(SQLITE_FILE))
                .context("Failed to create SQLite database")?;
        }
    }

    if reinitialize {
        println!("Reinitialized notes in {}", dir.display());
    } else {
        println!("Initialized notes in {}", dir.display());
    }
    Ok(())
}

async fn run(cli: Cli, store: &mut NoteStore) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::New {
            fields,
            interactive,
        } => {
            let id = store.create_note();
            let config = AutosaveConfig::default();
            let mut session =
                EditSession::open(store, &id, &config).context("Created note vanished")?;
            fields.apply(&mut session);
            if interactive {
                editor::run_interactive(store, session).await?;
            } else {
                session.finish(store);
            }
            println!("Created note {}", id);
        }

        Commands::Ls { query, tag } => {
            if store.is_empty() {
                eprintln!("No notes yet. Run 'fieldnotes new' to create your first note.");
                return Ok(ExitCode::SUCCESS);
            }
            store.set_query(query.unwrap_or_default());
            store.set_tag_filter(tag);
            for note in store.visible_notes() {
                print_row(note);
            }
        }

        Commands::Show { ids } => {
            let ids = parse_ids(&ids);
            if ids.is_empty() {
                eprintln!("No note IDs provided");
                return Ok(ExitCode::FAILURE);
            }

            let mut not_found = Vec::new();
            let mut first = true;
            for id in &ids {
                match store.get_note(id) {
                    Some(note) => {
                        if !first {
                            println!("\n{}\n", "=".repeat(40));
                        }
                        first = false;
                        print_note(note);
                    }
                    None => not_found.push(id),
                }
            }

            if !not_found.is_empty() {
                for id in not_found {
                    eprintln!("Note {} not found", id);
                }
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Edit {
            id,
            fields,
            interactive,
            debounce_ms,
        } => {
            if fields.is_empty() && !interactive {
                eprintln!("Nothing to update");
                return Ok(ExitCode::FAILURE);
            }

            let config = AutosaveConfig {
                debounce: Duration::from_millis(debounce_ms),
                ..AutosaveConfig::default()
            };
            let Some(mut session) = EditSession::open(store, &id, &config) else {
                eprintln!("Note {} not found", id);
                return Ok(ExitCode::FAILURE);
            };
            fields.apply(&mut session);

            let wrote = if interactive {
                editor::run_interactive(store, session).await?
            } else {
                session.finish(store)
            };
            if wrote {
                println!("Saved note {}", id);
            } else {
                println!("No changes to note {}", id);
            }
        }

        Commands::Rm { ids, yes } => {
            let ids = parse_ids(&ids);
            if ids.is_empty() {
                eprintln!("No note IDs provided");
                return Ok(ExitCode::FAILURE);
            }

            let mut not_found = Vec::new();
            for id in &ids {
                let Some(note) = store.get_note(id) else {
                    not_found.push(id);
                    continue;
                };
                let prompt = format!(
                    "Delete note {} ({})? This cannot be undone.",
                    id,
                    note.display_title()
                );
                if !yes && !confirm(&prompt)? {
                    println!("Kept note {}", id);
                    continue;
                }
                store.delete_note(id);
                println!("Deleted note {}", id);
            }

            if !not_found.is_empty() {
                for id in not_found {
                    eprintln!("Note {} not found", id);
                }
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Tags => {
            for tag in store.all_tags() {
                println!("{}", tag);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    if let Commands::Init { reinitialize } = cli.command {
        init(cli.dir, reinitialize, cli.backend)?;
        return Ok(ExitCode::SUCCESS);
    }

    let dir = get_data_dir(cli.dir.clone())?;
    let mut store = open_store(&dir, cli.backend).await?;
    let result = run(cli, &mut store).await;

    // Make the last mutation durable before exiting, even on error
    store.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_remove_saved_notes_keeps_other_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path();
        for name in owned_files() {
            std::fs::write(dir.join(name), "x").unwrap();
        }
        std::fs::write(dir.join("thesis.md"), "mine").unwrap();
        std::fs::write(dir.join("other.json.tmp"), "mine").unwrap();
        std::fs::create_dir(dir.join("photos")).unwrap();

        remove_saved_notes(dir).unwrap();

        assert!(!has_saved_notes(dir));
        for name in owned_files() {
            assert!(!dir.join(&name).exists(), "{} left behind", name);
        }
        assert!(dir.join("thesis.md").exists());
        assert!(dir.join("other.json.tmp").exists());
        assert!(dir.join("photos").is_dir());
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_ids(" , ").is_empty());
    }

    #[test]
    fn test_field_args_is_empty() {
        assert!(FieldArgs::default().is_empty());
        let args = FieldArgs {
            pin: true,
            ..FieldArgs::default()
        };
        assert!(!args.is_empty());
    }
}
