//! Three-way reconciliation of the local and remote list records.
//!
//! The merge engine compares both replicas against their shared last-sync
//! baseline and produces one converged [`NoteListRecord`], flagging notes
//! whose content diverged on both sides for the conflict resolver.
//!
//! All work happens on an in-memory [`SyncSnapshot`]; nothing is persisted
//! here, so a cancelled cycle can discard the result wholesale.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use similar::{ChangeTag, TextDiff};
use uuid::Uuid;

use crate::models::{EntryKind, Folder, Note, NoteListRecord, OrderEntry};

/// Everything a merge cycle operates on, captured up front.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    /// The current local list record
    pub local_list: NoteListRecord,
    /// The list record assembled from the remote store
    pub remote_list: NoteListRecord,
    /// Full local note records by id
    pub local_notes: HashMap<Uuid, Note>,
    /// Full remote note records by id
    pub remote_notes: HashMap<Uuid, Note>,
    /// This client's identity, used for deterministic tie-breaks
    pub local_client: Option<String>,
}

impl SyncSnapshot {
    /// The shared baseline: the older of the two sides' last-sync markers.
    ///
    /// A note modified after this instant counts as changed on its side.
    /// `None` means the replicas have never synced; everything counts as
    /// changed.
    pub fn baseline(&self) -> Option<DateTime<Utc>> {
        match (self.local_list.last_sync, self.remote_list.last_sync) {
            (Some(l), Some(r)) => Some(l.min(r)),
            _ => None,
        }
    }

    /// True when the remote side's last-sync marker is at least as recent
    /// as the local one. Exact ties resolve to remote by policy.
    pub fn remote_is_primary(&self) -> bool {
        match (self.local_list.last_sync, self.remote_list.last_sync) {
            (Some(l), Some(r)) => r >= l,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => true,
        }
    }
}

/// A note whose content changed on both sides since the shared baseline.
#[derive(Debug, Clone)]
pub struct DivergentNote {
    pub local: Note,
    pub remote: Note,
}

/// Result of one merge pass, before conflict resolution.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The converged list record (divergent notes not yet included)
    pub merged: NoteListRecord,
    /// Full records for every note in the merged list
    pub merged_notes: Vec<Note>,
    /// Notes flagged for the conflict resolver
    pub divergent: Vec<DivergentNote>,
    /// Notes whose metadata was merged by last-writer-wins
    pub metadata_merges: usize,
}

/// Which replica a per-note decision favored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Merge the two replicas in `snapshot` into one converged record.
pub fn merge(snapshot: &SyncSnapshot) -> MergeOutcome {
    let baseline = snapshot.baseline();
    let remote_primary = snapshot.remote_is_primary();

    let mut merged_notes: Vec<Note> = Vec::new();
    let mut divergent: Vec<DivergentNote> = Vec::new();
    let mut metadata_merges = 0usize;

    let mut ids: Vec<Uuid> = snapshot
        .local_notes
        .keys()
        .chain(snapshot.remote_notes.keys())
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    ids.sort();

    for id in ids {
        match (
            snapshot.local_notes.get(&id),
            snapshot.remote_notes.get(&id),
        ) {
            (Some(local), Some(remote)) => {
                if local.fingerprint == remote.fingerprint {
                    // Content identical; reconcile metadata only
                    if notes_metadata_equal(local, remote) {
                        merged_notes.push(local.clone());
                    } else {
                        let winner = metadata_winner(
                            local,
                            remote,
                            snapshot.local_client.as_deref(),
                            snapshot.remote_list.last_sync_client.as_deref(),
                        );
                        tracing::debug!(
                            note_id = %id.simple(),
                            winner = ?winner,
                            "metadata merged by last-writer-wins"
                        );
                        metadata_merges += 1;
                        merged_notes.push(match winner {
                            Side::Local => local.clone(),
                            Side::Remote => remote.clone(),
                        });
                    }
                } else {
                    let local_changed = changed_since(local, baseline);
                    let remote_changed = changed_since(remote, baseline);
                    match (local_changed, remote_changed) {
                        (true, false) => merged_notes.push(local.clone()),
                        (false, true) => merged_notes.push(remote.clone()),
                        // Both changed, or neither changed yet content
                        // differs (clock drift): divergent either way, so
                        // no edit can be lost silently.
                        _ => {
                            tracing::info!(note_id = %id.simple(), "divergent content detected");
                            divergent.push(DivergentNote {
                                local: local.clone(),
                                remote: remote.clone(),
                            });
                        }
                    }
                }
            }
            (Some(local), None) => {
                // Created locally, or deleted remotely after the baseline
                if changed_since(local, baseline) {
                    merged_notes.push(local.clone());
                } else {
                    tracing::debug!(note_id = %id.simple(), "pruning note deleted on remote");
                }
            }
            (None, Some(remote)) => {
                if changed_since(remote, baseline) {
                    merged_notes.push(remote.clone());
                } else {
                    tracing::debug!(note_id = %id.simple(), "pruning note deleted locally");
                }
            }
            (None, None) => unreachable!("id came from one of the maps"),
        }
    }

    // Folders: union by id; the primary side wins disagreements
    let folders = merge_folders(
        &snapshot.local_list.folders,
        &snapshot.remote_list.folders,
        remote_primary,
    );

    // Folder-level archiving applies as a unit: when the two sides
    // disagree on a folder's archived flag, every member note inherits the
    // winning state, never a partial mix.
    apply_folder_archive_state(
        &mut merged_notes,
        &folders,
        &snapshot.local_list.folders,
        &snapshot.remote_list.folders,
    );

    // Ordering: the primary side's sequences dominate; entries unique to
    // the other side are appended; dead ids are pruned. Divergent notes
    // keep their slot (the canonical version stays under the original id).
    let mut order_members: HashMap<Uuid, (EntryKind, bool)> = HashMap::new();
    for note in &merged_notes {
        order_members.insert(note.id, (EntryKind::Note, note.archived));
    }
    for d in &divergent {
        // The canonical version keeps the original id; file its order slot
        // under the side the conflict policy will designate canonical.
        let canonical = if remote_primary { &d.remote } else { &d.local };
        order_members.insert(canonical.id, (EntryKind::Note, canonical.archived));
    }
    for folder in &folders {
        order_members.insert(folder.id, (EntryKind::Folder, folder.archived));
    }

    let (primary_list, secondary_list) = if remote_primary {
        (&snapshot.remote_list, &snapshot.local_list)
    } else {
        (&snapshot.local_list, &snapshot.remote_list)
    };

    let top_level_order = merge_order(
        &primary_list.top_level_order,
        &secondary_list.top_level_order,
        &order_members,
        false,
    );
    let archived_top_level_order = merge_order(
        &primary_list.archived_top_level_order,
        &secondary_list.archived_top_level_order,
        &order_members,
        true,
    );

    let merged = NoteListRecord {
        schema_version: crate::models::SCHEMA_VERSION,
        notes: merged_notes.iter().map(|n| n.metadata()).collect(),
        folders,
        top_level_order,
        archived_top_level_order,
        // The orchestrator stamps the marker at persist time
        last_sync: snapshot.local_list.last_sync,
        last_sync_client: snapshot.local_list.last_sync_client.clone(),
    };

    MergeOutcome {
        merged,
        merged_notes,
        divergent,
        metadata_merges,
    }
}

/// Whether a note counts as changed on its side relative to the baseline.
fn changed_since(note: &Note, baseline: Option<DateTime<Utc>>) -> bool {
    match baseline {
        Some(b) => note.modified_at > b,
        None => true,
    }
}

fn notes_metadata_equal(a: &Note, b: &Note) -> bool {
    a.title == b.title
        && a.language == b.language
        && a.archived == b.archived
        && a.folder_id == b.folder_id
}

/// Last-writer-wins over `modified_at`; numerically identical timestamps
/// break deterministically on client identity (higher string wins, remote
/// when identities are missing or equal).
fn metadata_winner(
    local: &Note,
    remote: &Note,
    local_client: Option<&str>,
    remote_client: Option<&str>,
) -> Side {
    match local.modified_at.cmp(&remote.modified_at) {
        std::cmp::Ordering::Greater => Side::Local,
        std::cmp::Ordering::Less => Side::Remote,
        std::cmp::Ordering::Equal => match (local_client, remote_client) {
            (Some(l), Some(r)) if l > r => Side::Local,
            _ => Side::Remote,
        },
    }
}

fn merge_folders(local: &[Folder], remote: &[Folder], remote_primary: bool) -> Vec<Folder> {
    let remote_by_id: HashMap<Uuid, &Folder> = remote.iter().map(|f| (f.id, f)).collect();
    let local_ids: HashSet<Uuid> = local.iter().map(|f| f.id).collect();

    let mut merged: Vec<Folder> = Vec::new();
    for lf in local {
        match remote_by_id.get(&lf.id) {
            Some(rf) if lf != *rf => {
                merged.push(if remote_primary {
                    (*rf).clone()
                } else {
                    lf.clone()
                });
            }
            _ => merged.push(lf.clone()),
        }
    }
    for rf in remote {
        if !local_ids.contains(&rf.id) {
            merged.push(rf.clone());
        }
    }
    merged
}

/// Force member notes of folders whose archived flag disagreed between the
/// replicas into the folder's merged archived state.
fn apply_folder_archive_state(
    notes: &mut [Note],
    merged_folders: &[Folder],
    local_folders: &[Folder],
    remote_folders: &[Folder],
) {
    let local_by_id: HashMap<Uuid, bool> = local_folders.iter().map(|f| (f.id, f.archived)).collect();
    let remote_by_id: HashMap<Uuid, bool> =
        remote_folders.iter().map(|f| (f.id, f.archived)).collect();

    for folder in merged_folders {
        let flags_disagree = match (local_by_id.get(&folder.id), remote_by_id.get(&folder.id)) {
            (Some(l), Some(r)) => l != r,
            _ => false,
        };
        if !flags_disagree {
            continue;
        }
        for note in notes.iter_mut() {
            if note.folder_id == Some(folder.id) && note.archived != folder.archived {
                tracing::debug!(
                    note_id = %note.id.simple(),
                    folder_id = %folder.id.simple(),
                    archived = folder.archived,
                    "note inherits folder archive state"
                );
                note.archived = folder.archived;
            }
        }
    }
}

/// Merge one ordering sequence: primary entries first (valid, deduped),
/// then entries unique to the secondary side, then any members not placed
/// by either, in id order.
fn merge_order(
    primary: &[OrderEntry],
    secondary: &[OrderEntry],
    members: &HashMap<Uuid, (EntryKind, bool)>,
    archived: bool,
) -> Vec<OrderEntry> {
    let mut merged = Vec::new();
    let mut seen: HashSet<Uuid> = HashSet::new();

    for entry in primary.iter().chain(secondary.iter()) {
        if let Some((kind, member_archived)) = members.get(&entry.id) {
            if *member_archived == archived && seen.insert(entry.id) {
                merged.push(OrderEntry {
                    id: entry.id,
                    kind: *kind,
                });
            }
        }
    }

    let mut missing: Vec<(Uuid, EntryKind)> = members
        .iter()
        .filter(|(id, (_, member_archived))| *member_archived == archived && !seen.contains(id))
        .map(|(id, (kind, _))| (*id, *kind))
        .collect();
    missing.sort_by_key(|(id, _)| *id);
    for (id, kind) in missing {
        merged.push(OrderEntry { id, kind });
    }

    merged
}

/// Get a human-readable diff between the two sides of a divergence.
pub fn diff_preview(local: &str, remote: &str) -> String {
    let diff = TextDiff::from_lines(local, remote);

    let mut output = String::new();
    output.push_str("--- Local\n");
    output.push_str("+++ Remote\n");

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push_str(sign);
        output.push_str(change.value());
    }

    output
}
