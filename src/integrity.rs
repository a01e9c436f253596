//! Integrity repair: reconciling the list record against the durable
//! note records actually on disk.
//!
//! Three drift classes are detected and repaired:
//! - orphans: durable records with no list entry (entry synthesized)
//! - stale references: list entries with no durable record (entry removed)
//! - order drift: ordering sequences missing entries, holding duplicates,
//!   or referencing dead ids (rebuilt deterministically)
//!
//! The pass is idempotent and never silent: it always returns a structured
//! report, whether or not anything changed.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntryKind, Note, NoteListRecord, OrderEntry};

/// Structured result of one integrity pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Durable records that had no list entry and were synthesized into it
    pub orphans_restored: usize,
    /// List entries with no durable record, removed from the list and orders
    pub stale_removed: usize,
    /// Ordering sequences that had to be rebuilt (0..=2)
    pub order_fixed: usize,
    /// Whether this pass mutated the list record at all
    pub changed: bool,
}

/// Reconcile `list` against the durable notes on disk, repairing in place.
///
/// The caller is responsible for loading the inputs and persisting the
/// repaired record; this function is pure on its arguments so it can run
/// inside the operation queue's critical section.
pub fn repair(list: &mut NoteListRecord, disk: &[Note]) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let disk_by_id: HashMap<Uuid, &Note> = disk.iter().map(|n| (n.id, n)).collect();

    // Stale references: metadata without a durable record
    let before = list.notes.len();
    list.notes.retain(|m| {
        let keep = disk_by_id.contains_key(&m.id);
        if !keep {
            tracing::info!(note_id = %m.id.simple(), "removing stale list entry");
        }
        keep
    });
    report.stale_removed = before - list.notes.len();

    // Orphans: durable records without a metadata entry
    let known: HashSet<Uuid> = list.notes.iter().map(|m| m.id).collect();
    for note in disk {
        if !known.contains(&note.id) {
            tracing::info!(note_id = %note.id.simple(), "restoring orphaned note into list");
            list.notes.push(note.metadata());
            report.orphans_restored += 1;
        }
    }

    // Order drift: rebuild both sequences against the repaired membership
    let rebuilt_active = rebuild_order(list, false);
    let rebuilt_archived = rebuild_order(list, true);
    if rebuilt_active != list.top_level_order {
        list.top_level_order = rebuilt_active;
        report.order_fixed += 1;
    }
    if rebuilt_archived != list.archived_top_level_order {
        list.archived_top_level_order = rebuilt_archived;
        report.order_fixed += 1;
    }

    report.changed =
        report.orphans_restored > 0 || report.stale_removed > 0 || report.order_fixed > 0;

    if report.changed {
        tracing::info!(
            orphans_restored = report.orphans_restored,
            stale_removed = report.stale_removed,
            order_fixed = report.order_fixed,
            "integrity repair applied"
        );
    }

    report
}

/// Deterministically rebuild one ordering sequence.
///
/// Entries still valid for the sequence keep their relative order;
/// duplicates and references to dead or misfiled ids are dropped; members
/// that should be present but are not get appended in id order.
fn rebuild_order(list: &NoteListRecord, archived: bool) -> Vec<OrderEntry> {
    // The membership this sequence should contain, derived from archived flags
    let mut members: HashMap<Uuid, EntryKind> = HashMap::new();
    for meta in &list.notes {
        if meta.archived == archived {
            members.insert(meta.id, EntryKind::Note);
        }
    }
    for folder in &list.folders {
        if folder.archived == archived {
            members.insert(folder.id, EntryKind::Folder);
        }
    }

    let source = if archived {
        &list.archived_top_level_order
    } else {
        &list.top_level_order
    };

    let mut rebuilt = Vec::with_capacity(members.len());
    let mut seen: HashSet<Uuid> = HashSet::new();
    for entry in source {
        match members.get(&entry.id) {
            Some(kind) if !seen.contains(&entry.id) => {
                seen.insert(entry.id);
                rebuilt.push(OrderEntry {
                    id: entry.id,
                    kind: *kind,
                });
            }
            _ => {} // duplicate, dead id, or wrong sequence for its archived flag
        }
    }

    // Append members not yet placed, in id order for determinism
    let mut missing: Vec<(Uuid, EntryKind)> = members
        .iter()
        .filter(|(id, _)| !seen.contains(id))
        .map(|(id, kind)| (*id, *kind))
        .collect();
    missing.sort_by_key(|(id, _)| *id);
    for (id, kind) in missing {
        rebuilt.push(OrderEntry { id, kind });
    }

    rebuilt
}
