//! Single-writer serialization of all list mutations.
//!
//! Every change to the [`NoteListRecord`] (note saves, deletes, reorders,
//! folder archive toggles, and the sync cycle's merge persist) goes
//! through one [`OperationQueue`] per local store. A mutation is
//! load-current, apply-change, persist, under one writer lock, so a user
//! edit can never interleave with an in-progress merge-and-persist and
//! silently overwrite the merged result.
//!
//! Debounced autosave is an explicit pending-write token: schedulable,
//! reset by further edits, and unconditionally flushable before shutdown
//! or before a sync cycle begins.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{NoteError, NoteResult};
use crate::integrity::{self, IntegrityReport};
use crate::models::{Folder, Note, NoteListRecord, OrderEntry};
use crate::store::LocalNoteStore;
use crate::validation::{
    validate_folder_name, validate_language, validate_note_content, validate_title,
};

/// Default idle interval before a scheduled save is considered due.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// A scheduled, not-yet-persisted content edit.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub note: Note,
    pub due_at: Instant,
}

/// The single logical writer for one local store.
pub struct OperationQueue {
    store: LocalNoteStore,
    writer: Mutex<()>,
    pending: StdMutex<Option<PendingWrite>>,
    debounce: Duration,
}

impl OperationQueue {
    /// Wrap a store with a writer queue using the default debounce.
    pub fn new(store: LocalNoteStore) -> Self {
        Self::with_debounce(store, DEFAULT_DEBOUNCE)
    }

    /// Wrap a store with a custom autosave debounce interval.
    pub fn with_debounce(store: LocalNoteStore, debounce: Duration) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
            pending: StdMutex::new(None),
            debounce,
        }
    }

    /// Read access to the underlying store (display reads may use this
    /// without blocking the writer).
    pub fn store(&self) -> &LocalNoteStore {
        &self.store
    }

    /// Save a note immediately: durable record plus list entry, under the
    /// writer lock.
    pub async fn save_note(&self, note: Note) -> NoteResult<()> {
        validate_title(&note.title)?;
        validate_note_content(&note.content)?;
        validate_language(note.language.as_deref())?;

        let _guard = self.writer.lock().await;
        self.store.save(&note)?;

        let mut list = self.store.load_list()?;
        upsert_metadata(&mut list, &note);
        self.store.save_list(&list)
    }

    /// Delete a note: durable record, list entry, and every order slot.
    pub async fn delete_note(&self, id: Uuid) -> NoteResult<()> {
        let _guard = self.writer.lock().await;

        // Drop any pending autosave for the note being deleted
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.as_ref().is_some_and(|p| p.note.id == id) {
                *pending = None;
            }
        }

        self.store.delete(id)?;
        let mut list = self.store.load_list()?;
        list.notes.retain(|m| m.id != id);
        list.remove_from_orders(id);
        self.store.save_list(&list)
    }

    /// Move a note (or folder) to a new index within its order sequence.
    pub async fn reorder(&self, id: Uuid, new_index: usize) -> NoteResult<()> {
        let _guard = self.writer.lock().await;
        let mut list = self.store.load_list()?;

        let (seq, from) = if let Some(i) = list.top_level_order.iter().position(|e| e.id == id) {
            (&mut list.top_level_order, i)
        } else if let Some(i) = list
            .archived_top_level_order
            .iter()
            .position(|e| e.id == id)
        {
            (&mut list.archived_top_level_order, i)
        } else {
            return Err(NoteError::NotFound(format!("order entry {}", id.simple())));
        };

        let entry = seq.remove(from);
        let to = new_index.min(seq.len());
        seq.insert(to, entry);

        self.store.save_list(&list)
    }

    /// Archive or unarchive a single note, moving it between the two
    /// order sequences.
    pub async fn set_note_archived(&self, id: Uuid, archived: bool) -> NoteResult<()> {
        let _guard = self.writer.lock().await;

        let mut note = self.store.load(id)?;
        if note.archived == archived {
            return Ok(());
        }
        note.archived = archived;
        note.modified_at = chrono::Utc::now();
        self.store.save(&note)?;

        let mut list = self.store.load_list()?;
        upsert_metadata(&mut list, &note);
        self.store.save_list(&list)
    }

    /// Create a new folder, placed at the end of the active order.
    pub async fn create_folder(&self, name: &str) -> NoteResult<Folder> {
        validate_folder_name(name)?;
        let folder = Folder::new(name.trim());

        let _guard = self.writer.lock().await;
        let mut list = self.store.load_list()?;
        list.folders.push(folder.clone());
        list.place_in_order(OrderEntry::folder(folder.id), false);
        self.store.save_list(&list)?;
        Ok(folder)
    }

    /// Rename a folder.
    pub async fn rename_folder(&self, id: Uuid, name: &str) -> NoteResult<()> {
        validate_folder_name(name)?;
        let _guard = self.writer.lock().await;
        let mut list = self.store.load_list()?;
        let folder = list
            .folder_mut(id)
            .ok_or_else(|| NoteError::NotFound(format!("folder {}", id.simple())))?;
        folder.name = name.trim().to_string();
        self.store.save_list(&list)
    }

    /// Archive or unarchive a folder and every note in it, in one atomic
    /// list mutation. No note is ever left in a partial mix.
    pub async fn set_folder_archived(&self, id: Uuid, archived: bool) -> NoteResult<()> {
        let _guard = self.writer.lock().await;
        let mut list = self.store.load_list()?;

        let folder = list
            .folder_mut(id)
            .ok_or_else(|| NoteError::NotFound(format!("folder {}", id.simple())))?;
        folder.archived = archived;
        list.place_in_order(OrderEntry::folder(id), archived);

        let member_ids: Vec<Uuid> = list
            .notes
            .iter()
            .filter(|m| m.folder_id == Some(id))
            .map(|m| m.id)
            .collect();

        let now = chrono::Utc::now();
        for note_id in member_ids {
            let mut note = self.store.load(note_id)?;
            note.archived = archived;
            note.modified_at = now;
            self.store.save(&note)?;
            upsert_metadata(&mut list, &note);
        }

        tracing::info!(
            folder_id = %id.simple(),
            archived,
            "folder archive state applied to folder and members"
        );
        self.store.save_list(&list)
    }

    /// Delete a folder; member notes become unfiled.
    pub async fn delete_folder(&self, id: Uuid) -> NoteResult<()> {
        let _guard = self.writer.lock().await;
        let mut list = self.store.load_list()?;

        if list.folder(id).is_none() {
            return Err(NoteError::NotFound(format!("folder {}", id.simple())));
        }
        list.folders.retain(|f| f.id != id);
        list.remove_from_orders(id);

        let member_ids: Vec<Uuid> = list
            .notes
            .iter()
            .filter(|m| m.folder_id == Some(id))
            .map(|m| m.id)
            .collect();
        for note_id in member_ids {
            let mut note = self.store.load(note_id)?;
            note.folder_id = None;
            self.store.save(&note)?;
            upsert_metadata(&mut list, &note);
        }

        self.store.save_list(&list)
    }

    /// Schedule a debounced content save. A further edit to the same or
    /// another note replaces the token and resets its deadline.
    pub fn schedule_save(&self, note: Note) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some(PendingWrite {
            note,
            due_at: Instant::now() + self.debounce,
        });
    }

    /// Whether a pending write is currently scheduled.
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Flush the pending write unconditionally. Called before shutdown,
    /// before a sync cycle starts, and when the edited note is closed.
    pub async fn flush_pending(&self) -> NoteResult<()> {
        let taken = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(write) = taken {
            self.save_note(write.note).await?;
        }
        Ok(())
    }

    /// Flush the pending write only if its debounce deadline has passed.
    /// Drives the idle-timer autosave.
    pub async fn flush_due(&self, now: Instant) -> NoteResult<bool> {
        let due = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.as_ref() {
                Some(write) if write.due_at <= now => pending.take(),
                _ => None,
            }
        };
        match due {
            Some(write) => {
                self.save_note(write.note).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one integrity pass over the store, persisting repairs.
    pub async fn run_integrity(&self) -> NoteResult<IntegrityReport> {
        let _guard = self.writer.lock().await;
        let disk = self.store.load_all_notes()?;
        let mut list = self.store.load_list()?;
        let report = integrity::repair(&mut list, &disk);
        if report.changed {
            self.store.save_list(&list)?;
        }
        Ok(report)
    }

    /// Persist a completed merge: write every changed note record, remove
    /// the records the merge pruned, and store the merged list, all in one
    /// critical section so no user edit can interleave.
    ///
    /// The merge was computed on `snapshot_notes`, captured before any of
    /// this ran. A durable record is only overwritten or pruned while its
    /// current on-disk state still matches what the snapshot saw; a note
    /// edited, created, or deleted through the queue since then keeps its
    /// newer state (its metadata re-enters the merged list), and the next
    /// cycle reconciles it.
    pub async fn commit_merge(
        &self,
        mut merged: NoteListRecord,
        merged_notes: &[Note],
        pruned: &[Uuid],
        snapshot_notes: &HashMap<Uuid, Note>,
        cycle_time: chrono::DateTime<chrono::Utc>,
        client_id: &str,
    ) -> NoteResult<()> {
        let _guard = self.writer.lock().await;

        for note in merged_notes {
            match self.store.load(note.id) {
                Ok(disk) => {
                    let changed_since_snapshot = match snapshot_notes.get(&note.id) {
                        Some(seen) => disk != *seen,
                        // On disk but not in the snapshot: created after
                        // the snapshot was taken
                        None => true,
                    };
                    if changed_since_snapshot {
                        tracing::info!(
                            note_id = %note.id.simple(),
                            "keeping note edited during merge"
                        );
                        match merged.note_mut(note.id) {
                            Some(meta) => *meta = disk.metadata(),
                            None => {
                                let archived = disk.archived;
                                merged.notes.push(disk.metadata());
                                merged.place_in_order(OrderEntry::note(disk.id), archived);
                            }
                        }
                    } else if disk != *note {
                        self.store.save(note)?;
                    }
                }
                Err(NoteError::NotFound(_)) => {
                    if snapshot_notes.contains_key(&note.id) {
                        // Deleted through the queue mid-merge; do not
                        // resurrect it
                        tracing::info!(
                            note_id = %note.id.simple(),
                            "dropping note deleted during merge"
                        );
                        merged.notes.retain(|m| m.id != note.id);
                        merged.remove_from_orders(note.id);
                    } else {
                        self.store.save(note)?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        for id in pruned {
            match self.store.load(*id) {
                Ok(disk) => {
                    let unchanged = snapshot_notes
                        .get(id)
                        .map_or(false, |seen| *seen == disk);
                    if unchanged {
                        tracing::info!(note_id = %id.simple(), "removing note pruned by merge");
                        self.store.delete(*id)?;
                    } else {
                        tracing::info!(
                            note_id = %id.simple(),
                            "keeping note edited during merge"
                        );
                        let archived = disk.archived;
                        merged.notes.push(disk.metadata());
                        merged.place_in_order(OrderEntry::note(disk.id), archived);
                    }
                }
                Err(NoteError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        merged.last_sync = Some(cycle_time);
        merged.last_sync_client = Some(client_id.to_string());
        self.store.save_list(&merged)
    }
}

/// Replace or insert a note's metadata entry and keep its order slot
/// consistent with its archived flag.
fn upsert_metadata(list: &mut NoteListRecord, note: &Note) {
    let previous_archived = list.note(note.id).map(|m| m.archived);
    match list.note_mut(note.id) {
        Some(meta) => *meta = note.metadata(),
        None => list.notes.push(note.metadata()),
    }
    let in_any_order = list
        .top_level_order
        .iter()
        .chain(list.archived_top_level_order.iter())
        .any(|e| e.id == note.id);
    if !in_any_order || previous_archived != Some(note.archived) {
        list.place_in_order(OrderEntry::note(note.id), note.archived);
    }
}
