//! Data models for the note sync engine.
//!
//! This module defines the core entities: Note, NoteMetadata, Folder, and
//! the NoteListRecord that ties them together with two ordering sequences.
//! All IDs are UUID7, serialized as hex strings in JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::content_fingerprint;

/// Current on-disk schema version of the list record.
pub const SCHEMA_VERSION: u32 = 2;

/// Maximum number of content lines included in the derived preview header.
pub const PREVIEW_MAX_LINES: usize = 3;

/// Maximum length of the derived preview header in characters.
pub const PREVIEW_MAX_CHARS: usize = 160;

/// Represents a full note including its content.
///
/// Notes are stored one-per-file in the local store. The `fingerprint`
/// field is a digest of `content` only; title, folder, and archived state
/// never influence it, so metadata-only edits can be told apart from
/// content edits during merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier for the note (UUID7, stable for the note's lifetime)
    pub id: Uuid,
    /// Display title
    pub title: String,
    /// The note text content
    pub content: String,
    /// Derived preview header (first lines of content, truncated)
    pub preview: String,
    /// Optional language tag (e.g. "en", "markdown")
    #[serde(default)]
    pub language: Option<String>,
    /// When the note was last modified
    pub modified_at: DateTime<Utc>,
    /// Whether the note lives in the archived view
    #[serde(default)]
    pub archived: bool,
    /// Folder this note belongs to (None = unfiled)
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    /// Content fingerprint (hex sha256 of content only)
    pub fingerprint: String,
}

impl Note {
    /// Create a new unfiled note with a fresh id and fingerprint
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            preview: derive_preview(&content),
            fingerprint: content_fingerprint(&content),
            content,
            language: None,
            modified_at: Utc::now(),
            archived: false,
            folder_id: None,
        }
    }

    /// Replace the content, recomputing the preview and fingerprint
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.preview = derive_preview(&self.content);
        self.fingerprint = content_fingerprint(&self.content);
        self.modified_at = Utc::now();
    }

    /// Get the note ID as a hex string
    pub fn id_hex(&self) -> String {
        self.id.simple().to_string()
    }

    /// Project this note into its list-record metadata entry
    pub fn metadata(&self) -> NoteMetadata {
        NoteMetadata {
            id: self.id,
            title: self.title.clone(),
            preview: self.preview.clone(),
            language: self.language.clone(),
            modified_at: self.modified_at,
            archived: self.archived,
            folder_id: self.folder_id,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// The projection of a [`Note`] stored in the list record for fast listing.
///
/// Identical to `Note` minus the content body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub id: Uuid,
    pub title: String,
    pub preview: String,
    #[serde(default)]
    pub language: Option<String>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    pub fingerprint: String,
}

impl NoteMetadata {
    /// Get the note ID as a hex string
    pub fn id_hex(&self) -> String {
        self.id.simple().to_string()
    }
}

/// A folder grouping notes in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Unique identifier (UUID7)
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Whether the folder lives in the archived view
    #[serde(default)]
    pub archived: bool,
}

impl Folder {
    /// Create a new unarchived folder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            archived: false,
        }
    }
}

/// What kind of entity an ordering entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Note,
    Folder,
}

/// One slot in a top-level ordering sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: Uuid,
    pub kind: EntryKind,
}

impl OrderEntry {
    pub fn note(id: Uuid) -> Self {
        Self {
            id,
            kind: EntryKind::Note,
        }
    }

    pub fn folder(id: Uuid) -> Self {
        Self {
            id,
            kind: EntryKind::Folder,
        }
    }
}

/// The single list record: metadata for every note, all folders, both
/// top-level ordering sequences, and the last-sync marker.
///
/// New fields must be optional (`serde(default)`) so list records written
/// by older versions remain loadable, and unknown fields written by newer
/// versions are ignored on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteListRecord {
    pub schema_version: u32,
    #[serde(default)]
    pub notes: Vec<NoteMetadata>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    /// Display order for the active (unarchived) sidebar
    #[serde(default)]
    pub top_level_order: Vec<OrderEntry>,
    /// Display order for the archived view
    #[serde(default)]
    pub archived_top_level_order: Vec<OrderEntry>,
    /// Timestamp of the most recent successful merge (None = never synced)
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Identity of the client that performed the most recent merge
    #[serde(default)]
    pub last_sync_client: Option<String>,
}

impl Default for NoteListRecord {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            notes: Vec::new(),
            folders: Vec::new(),
            top_level_order: Vec::new(),
            archived_top_level_order: Vec::new(),
            last_sync: None,
            last_sync_client: None,
        }
    }
}

impl NoteListRecord {
    /// Find a note's metadata entry by id
    pub fn note(&self, id: Uuid) -> Option<&NoteMetadata> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// Find a note's metadata entry mutably
    pub fn note_mut(&mut self, id: Uuid) -> Option<&mut NoteMetadata> {
        self.notes.iter_mut().find(|n| n.id == id)
    }

    /// Find a folder by id
    pub fn folder(&self, id: Uuid) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    /// Find a folder mutably
    pub fn folder_mut(&mut self, id: Uuid) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.id == id)
    }

    /// Remove an id from both ordering sequences
    pub fn remove_from_orders(&mut self, id: Uuid) {
        self.top_level_order.retain(|e| e.id != id);
        self.archived_top_level_order.retain(|e| e.id != id);
    }

    /// Append an entry to the ordering sequence matching `archived`,
    /// removing it from the other sequence first.
    pub fn place_in_order(&mut self, entry: OrderEntry, archived: bool) {
        self.remove_from_orders(entry.id);
        if archived {
            self.archived_top_level_order.push(entry);
        } else {
            self.top_level_order.push(entry);
        }
    }
}

/// Derive the preview header from note content: the first few non-empty
/// lines, truncated to a bounded length.
pub fn derive_preview(content: &str) -> String {
    let mut preview = String::new();
    let mut lines = 0;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if lines > 0 {
            preview.push('\n');
        }
        preview.push_str(trimmed);
        lines += 1;
        if lines >= PREVIEW_MAX_LINES || preview.len() >= PREVIEW_MAX_CHARS {
            break;
        }
    }
    if preview.len() > PREVIEW_MAX_CHARS {
        let mut cut = PREVIEW_MAX_CHARS;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
    }
    preview
}
