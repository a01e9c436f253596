//! Reporting boundary between the engine and its caller.
//!
//! The engine emits structured outcomes and never renders user-facing
//! text; how (or whether) an outcome is displayed is the presentation
//! layer's concern. Callers implement [`SyncObserver`]; every method has a
//! no-op default, so an observer only handles what it cares about.

use serde::{Deserialize, Serialize};

use crate::conflicts::ConflictRecord;
use crate::integrity::IntegrityReport;
use crate::sync::SyncStatus;

/// Structured summary of one completed sync cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Notes pulled down from the remote store
    pub pulled: usize,
    /// Notes pushed up to the remote store
    pub pushed: usize,
    /// Remote entries deleted during the push
    pub deleted_remote: usize,
    /// Conflict copies created by this cycle
    pub conflicts: Vec<ConflictRecord>,
    /// Notes whose metadata was merged by last-writer-wins
    pub metadata_merges: usize,
    /// The post-cycle integrity pass
    pub integrity: IntegrityReport,
}

/// Structured failure record for a cycle that did not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Status the engine moved to (Offline or AuthRequired)
    pub status: SyncStatus,
    /// Description of the failure, for logs or diagnostics
    pub message: String,
    /// How many attempts were made before giving up
    pub attempts: u32,
}

/// Observer the engine calls with structured outcomes.
pub trait SyncObserver: Send + Sync {
    /// The orchestrator's status changed.
    fn status_changed(&self, _status: SyncStatus) {}

    /// A sync cycle completed successfully.
    fn sync_completed(&self, _outcome: &SyncOutcome) {}

    /// A merge pass created conflict copies.
    fn conflicts_detected(&self, _count: usize) {}

    /// An integrity pass ran (report included even when nothing changed).
    fn integrity_repaired(&self, _report: &IntegrityReport) {}

    /// A sync cycle failed.
    fn sync_failed(&self, _failure: &SyncFailure) {}
}

/// Observer that discards every outcome.
pub struct NullObserver;

impl SyncObserver for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_observer_accepts_everything() {
        let observer = NullObserver;
        observer.status_changed(SyncStatus::Idle);
        observer.sync_completed(&SyncOutcome::default());
        observer.conflicts_detected(2);
        observer.integrity_repaired(&IntegrityReport::default());
        observer.sync_failed(&SyncFailure {
            status: SyncStatus::Offline,
            message: "network down".to_string(),
            attempts: 3,
        });
    }

    #[test]
    fn test_sync_outcome_serializes() {
        let outcome = SyncOutcome {
            pulled: 2,
            pushed: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"pulled\":2"));
    }
}
