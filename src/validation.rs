//! Input validation for the note sync engine.
//!
//! All validators return `NoteError::Validation` on failure.

use uuid::Uuid;

use crate::error::{NoteError, NoteResult};

// Limits
pub const MAX_TITLE_LENGTH: usize = 250;
pub const MAX_NOTE_CONTENT_LENGTH: usize = 1_000_000; // 1MB of text
pub const MAX_FOLDER_NAME_LENGTH: usize = 100;
pub const MAX_LANGUAGE_TAG_LENGTH: usize = 40;

/// Validate a note title.
///
/// Titles may be empty (untitled notes are legal) but must not exceed
/// MAX_TITLE_LENGTH characters.
pub fn validate_title(title: &str) -> NoteResult<()> {
    if title.len() > MAX_TITLE_LENGTH {
        return Err(NoteError::validation(
            "title",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_TITLE_LENGTH,
                title.len()
            ),
        ));
    }
    Ok(())
}

/// Validate note content length.
pub fn validate_note_content(content: &str) -> NoteResult<()> {
    if content.len() > MAX_NOTE_CONTENT_LENGTH {
        return Err(NoteError::validation(
            "content",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_NOTE_CONTENT_LENGTH,
                content.len()
            ),
        ));
    }
    Ok(())
}

/// Validate a folder name.
///
/// Folder names must be non-empty after trimming and bounded in length.
pub fn validate_folder_name(name: &str) -> NoteResult<()> {
    let stripped = name.trim();

    if stripped.is_empty() {
        return Err(NoteError::validation(
            "folder_name",
            "cannot be empty or whitespace only",
        ));
    }

    if stripped.len() > MAX_FOLDER_NAME_LENGTH {
        return Err(NoteError::validation(
            "folder_name",
            format!(
                "cannot exceed {} characters (got {})",
                MAX_FOLDER_NAME_LENGTH,
                stripped.len()
            ),
        ));
    }

    Ok(())
}

/// Validate an optional language tag.
pub fn validate_language(language: Option<&str>) -> NoteResult<()> {
    if let Some(lang) = language {
        if lang.is_empty() || lang.len() > MAX_LANGUAGE_TAG_LENGTH {
            return Err(NoteError::validation(
                "language",
                format!(
                    "must be 1..={} characters",
                    MAX_LANGUAGE_TAG_LENGTH
                ),
            ));
        }
    }
    Ok(())
}

/// Validate and parse an entity id from its hex string form.
///
/// Accepts both hyphenated and non-hyphenated formats, as produced by
/// remote listings and older records.
pub fn validate_entity_id(value: &str, field_name: &str) -> NoteResult<Uuid> {
    let cleaned = value.replace('-', "");
    Uuid::parse_str(&cleaned)
        .map_err(|e| NoteError::validation(field_name, format!("invalid UUID format: {}", e)))
}
