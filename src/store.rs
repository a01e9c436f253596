//! Durable local storage for notes and the list record.
//!
//! Layout: one JSON file per note under `<root>/notes/<id>.json` plus a
//! single `<root>/notelist.json` holding the [`NoteListRecord`].
//!
//! Every write goes to a temporary file in the same directory and is then
//! renamed over the target, so a crash mid-write never leaves a
//! half-written record behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, NoteListRecord};

/// File name of the list record inside the store root.
pub const LIST_FILE_NAME: &str = "notelist.json";

/// Subdirectory holding the per-note records.
pub const NOTES_DIR_NAME: &str = "notes";

/// File-backed store for notes and the list record.
pub struct LocalNoteStore {
    root: PathBuf,
    notes_dir: PathBuf,
}

impl LocalNoteStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> NoteResult<Self> {
        let root = root.into();
        let notes_dir = root.join(NOTES_DIR_NAME);
        fs::create_dir_all(&notes_dir)?;
        Ok(Self { root, notes_dir })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn note_path(&self, id: Uuid) -> PathBuf {
        self.notes_dir.join(format!("{}.json", id.simple()))
    }

    fn list_path(&self) -> PathBuf {
        self.root.join(LIST_FILE_NAME)
    }

    /// Load a single note by id.
    pub fn load(&self, id: Uuid) -> NoteResult<Note> {
        let path = self.note_path(id);
        if !path.exists() {
            return Err(NoteError::note_not_found(id.simple()));
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            NoteError::storage(format!("corrupt note record {}: {}", id.simple(), e))
        })
    }

    /// Persist a note atomically.
    pub fn save(&self, note: &Note) -> NoteResult<()> {
        let json = serde_json::to_string_pretty(note)?;
        write_atomic(&self.note_path(note.id), json.as_bytes())
    }

    /// Delete a note's durable record. No tombstone is retained.
    pub fn delete(&self, id: Uuid) -> NoteResult<()> {
        let path = self.note_path(id);
        if !path.exists() {
            return Err(NoteError::note_not_found(id.simple()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Load the list record, or an empty default when none exists yet.
    pub fn load_list(&self) -> NoteResult<NoteListRecord> {
        let path = self.list_path();
        if !path.exists() {
            return Ok(NoteListRecord::default());
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| NoteError::storage(format!("corrupt list record: {}", e)))
    }

    /// Persist the list record atomically.
    pub fn save_list(&self, list: &NoteListRecord) -> NoteResult<()> {
        let json = serde_json::to_string_pretty(list)?;
        write_atomic(&self.list_path(), json.as_bytes())
    }

    /// The set of note ids that have a durable record on disk.
    pub fn list_note_ids(&self) -> NoteResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.notes_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every parseable note record on disk.
    ///
    /// Unparseable files are skipped with a warning rather than failing the
    /// whole pass, so one damaged record cannot block integrity repair of
    /// the rest.
    pub fn load_all_notes(&self) -> NoteResult<Vec<Note>> {
        let mut notes = Vec::new();
        for id in self.list_note_ids()? {
            match self.load(id) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    tracing::warn!(note_id = %id.simple(), error = %e, "skipping unreadable note record");
                }
            }
        }
        Ok(notes)
    }
}

/// Write `data` to `path` via a temporary file in the same directory
/// followed by a rename.
fn write_atomic(path: &Path, data: &[u8]) -> NoteResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
