//! Conflict resolution for divergent notes.
//!
//! When the merge engine flags a note as divergent, one side is designated
//! canonical and keeps the original id; the other side's content is
//! preserved in a freshly minted conflict copy. Nothing is ever discarded.
//!
//! The conflict copy joins the merged list record in the same pass, so it
//! is part of the very next upstream push rather than existing only
//! locally until some later cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::content_fingerprint;
use crate::merge::{diff_preview, MergeOutcome};
use crate::models::{derive_preview, Note, NoteListRecord, OrderEntry};

/// Structured record of one resolved divergence, for the observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Id of the note that kept the canonical content
    pub original_id: Uuid,
    /// Id of the freshly minted conflict copy
    pub copy_id: Uuid,
    /// Title of the conflict copy
    pub copy_title: String,
    /// Which side won: true when the remote version became canonical
    pub remote_canonical: bool,
    /// Human-readable diff between the two sides
    pub diff: String,
}

/// The merge outcome with all divergences resolved.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The final converged list record, conflict copies included
    pub merged: NoteListRecord,
    /// Full records for every note in the merged list
    pub merged_notes: Vec<Note>,
    /// One record per resolved divergence
    pub conflicts: Vec<ConflictRecord>,
}

impl Resolution {
    /// Number of conflict copies created in this pass.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Resolve every divergence in `outcome`.
///
/// Policy (explicit, not implicit): the side whose last-sync marker is
/// newest is canonical; on an exact tie the remote side is canonical.
/// The caller passes that decision in as `remote_canonical`, computed from
/// the snapshot's markers.
pub fn resolve(outcome: MergeOutcome, remote_canonical: bool, now: DateTime<Utc>) -> Resolution {
    let MergeOutcome {
        mut merged,
        mut merged_notes,
        divergent,
        ..
    } = outcome;

    let mut conflicts = Vec::with_capacity(divergent.len());

    for d in divergent {
        let diff = diff_preview(&d.local.content, &d.remote.content);
        let (canonical, losing) = if remote_canonical {
            (d.remote, d.local)
        } else {
            (d.local, d.remote)
        };

        let copy = conflict_copy(&canonical, &losing, &merged, now);
        tracing::info!(
            note_id = %canonical.id.simple(),
            copy_id = %copy.id.simple(),
            remote_canonical,
            "materialized conflict copy"
        );

        conflicts.push(ConflictRecord {
            original_id: canonical.id,
            copy_id: copy.id,
            copy_title: copy.title.clone(),
            remote_canonical,
            diff,
        });

        // Canonical keeps the original id and its existing order slot
        merged.notes.push(canonical.metadata());

        // The copy is unarchived and joins the active order right after
        // the original (appended when the original is not top-level)
        let position = merged
            .top_level_order
            .iter()
            .position(|e| e.id == canonical.id);
        let entry = OrderEntry::note(copy.id);
        match position {
            Some(i) => merged.top_level_order.insert(i + 1, entry),
            None => merged.top_level_order.push(entry),
        }
        merged.notes.push(copy.metadata());

        merged_notes.push(canonical);
        merged_notes.push(copy);
    }

    Resolution {
        merged,
        merged_notes,
        conflicts,
    }
}

/// Construct the conflict copy holding the losing side's content.
///
/// Fresh id, annotated title, full content and language preserved,
/// unarchived, attached to the original's folder when that folder exists
/// in the merged record (unfiled otherwise).
fn conflict_copy(
    canonical: &Note,
    losing: &Note,
    merged: &NoteListRecord,
    now: DateTime<Utc>,
) -> Note {
    let folder_id = canonical
        .folder_id
        .filter(|id| merged.folder(*id).is_some());

    let title = format!(
        "{} (conflicted copy {})",
        losing.title,
        now.format("%Y-%m-%d %H:%M")
    );

    Note {
        id: Uuid::now_v7(),
        title,
        preview: derive_preview(&losing.content),
        fingerprint: content_fingerprint(&losing.content),
        content: losing.content.clone(),
        language: losing.language.clone(),
        modified_at: now,
        archived: false,
        folder_id,
    }
}
