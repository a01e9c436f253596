//! Sync orchestration between the local store and the remote drive.
//!
//! [`SyncEngine`] drives the full cycle: flush pending edits, pull the
//! remote state, merge against the local snapshot, resolve divergences
//! into conflict copies, persist through the operation queue, then push
//! the converged state back up. Status moves Idle -> Syncing -> one of
//! {Idle, Offline, AuthRequired}:
//! - Transient network failures retry with exponential backoff, then end
//!   in Offline; the next trigger retries the whole cycle.
//! - Auth failures end in AuthRequired and suspend background syncing
//!   until [`SyncEngine::credentials_refreshed`] is called.
//! - A wall-clock timeout bounds the whole cycle.
//!
//! Requests arriving while a cycle runs coalesce into a single pending
//! flag; at most one cycle is ever in flight.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::conflicts::resolve;
use crate::error::{NoteError, NoteResult};
use crate::integrity::IntegrityReport;
use crate::merge::{merge, SyncSnapshot};
use crate::models::{Note, NoteListRecord};
use crate::observer::{SyncFailure, SyncObserver, SyncOutcome};
use crate::queue::OperationQueue;
use crate::remote::{RemoteError, RemoteStore, LIST_RECORD_KEY};
use crate::validation::validate_entity_id;

/// Base delay for the first retry; doubles on each subsequent attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Externally visible state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No cycle running; the last one (if any) completed
    Idle,
    /// A cycle is in flight
    Syncing,
    /// The last cycle failed on connectivity; will retry on next trigger
    Offline,
    /// Credentials were rejected; background syncing is suspended
    AuthRequired,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Offline => write!(f, "offline"),
            SyncStatus::AuthRequired => write!(f, "auth_required"),
        }
    }
}

/// How a cycle ended before producing an outcome.
enum CycleError {
    /// The remote boundary failed after `attempts` tries
    Remote(RemoteError, u32),
    /// The cycle was cancelled before its persist step
    Cancelled,
    /// Local storage or serialization failed
    Local(NoteError),
}

impl From<NoteError> for CycleError {
    fn from(err: NoteError) -> Self {
        CycleError::Local(err)
    }
}

/// Orchestrates sync cycles against a [`RemoteStore`].
pub struct SyncEngine<R: RemoteStore, O: SyncObserver> {
    queue: Arc<OperationQueue>,
    remote: R,
    observer: O,
    client_id: String,
    timeout: Duration,
    max_retries: u32,
    status: StdMutex<SyncStatus>,
    cycle: Mutex<()>,
    pending: AtomicBool,
    cancelled: AtomicBool,
}

impl<R: RemoteStore, O: SyncObserver> SyncEngine<R, O> {
    /// Create an engine using the configuration's identity and limits.
    pub fn new(queue: Arc<OperationQueue>, remote: R, observer: O, config: &EngineConfig) -> Self {
        Self::with_limits(
            queue,
            remote,
            observer,
            config.client_id().to_string(),
            config.sync_timeout(),
            config.max_retries(),
        )
    }

    /// Create an engine with explicit identity, cycle timeout, and retry
    /// bound.
    pub fn with_limits(
        queue: Arc<OperationQueue>,
        remote: R,
        observer: O,
        client_id: String,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            remote,
            observer,
            client_id,
            timeout,
            max_retries,
            status: StdMutex::new(SyncStatus::Idle),
            cycle: Mutex::new(()),
            pending: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current orchestrator status.
    pub fn status(&self) -> SyncStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The remote store this engine syncs against.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// The operation queue this engine persists through.
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = {
            let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        };
        if changed {
            tracing::debug!(%status, "sync status changed");
            self.observer.status_changed(status);
        }
    }

    /// Request that the in-flight cycle discard its result before the
    /// persist step; the cancelled [`SyncEngine::sync`] call returns
    /// [`NoteError::Cancelled`]. A no-op when no cycle is running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clear the AuthRequired suspension after the caller obtained fresh
    /// credentials.
    pub fn credentials_refreshed(&self) {
        if self.status() == SyncStatus::AuthRequired {
            self.set_status(SyncStatus::Idle);
        }
    }

    /// Startup pass: repair local integrity, then attempt an initial sync.
    ///
    /// Returns the integrity report; the sync attempt's outcome is
    /// reported through the observer as usual.
    pub async fn startup(&self) -> NoteResult<IntegrityReport> {
        let report = self.queue.run_integrity().await?;
        self.observer.integrity_repaired(&report);
        self.sync(false).await?;
        Ok(report)
    }

    /// Periodic driver: flush an overdue autosave, then sync.
    pub async fn background_tick(&self) -> NoteResult<SyncStatus> {
        self.queue.flush_due(Instant::now()).await?;
        self.sync(false).await
    }

    /// Flush pending edits before the process exits. Does not sync.
    pub async fn shutdown(&self) -> NoteResult<()> {
        self.queue.flush_pending().await
    }

    /// Run a sync cycle, or coalesce into the one already running.
    ///
    /// Without `force`, a suspended engine (AuthRequired) declines to
    /// start a cycle. If a cycle is in flight the request sets a pending
    /// flag and returns immediately; the running cycle re-runs once after
    /// completing, so the latest local state always gets synced.
    pub async fn sync(&self, force: bool) -> NoteResult<SyncStatus> {
        if !force && self.status() == SyncStatus::AuthRequired {
            return Ok(SyncStatus::AuthRequired);
        }
        let _guard = match self.cycle.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.pending.store(true, Ordering::SeqCst);
                tracing::debug!("sync already in flight, coalescing request");
                return Ok(self.status());
            }
        };
        self.cancelled.store(false, Ordering::SeqCst);
        loop {
            let status = self.run_cycle_guarded().await?;
            if status != SyncStatus::Idle || !self.pending.swap(false, Ordering::SeqCst) {
                return Ok(status);
            }
            tracing::debug!("running coalesced sync request");
        }
    }

    /// One cycle under the wall-clock timeout, with failure classification
    /// and observer reporting.
    async fn run_cycle_guarded(&self) -> NoteResult<SyncStatus> {
        self.set_status(SyncStatus::Syncing);
        match tokio::time::timeout(self.timeout, self.run_cycle()).await {
            Ok(Ok(outcome)) => {
                tracing::info!(
                    pulled = outcome.pulled,
                    pushed = outcome.pushed,
                    deleted_remote = outcome.deleted_remote,
                    conflicts = outcome.conflicts.len(),
                    "sync cycle completed"
                );
                self.set_status(SyncStatus::Idle);
                self.observer.sync_completed(&outcome);
                Ok(SyncStatus::Idle)
            }
            Ok(Err(CycleError::Remote(err, attempts))) => {
                let status = if err.is_auth() {
                    SyncStatus::AuthRequired
                } else {
                    SyncStatus::Offline
                };
                tracing::warn!(error = %err, attempts, "sync cycle failed");
                self.set_status(status);
                self.observer.sync_failed(&SyncFailure {
                    status,
                    message: err.to_string(),
                    attempts,
                });
                Ok(status)
            }
            Ok(Err(CycleError::Cancelled)) => {
                tracing::info!("sync cycle cancelled, result discarded");
                self.set_status(SyncStatus::Idle);
                Err(NoteError::Cancelled)
            }
            Ok(Err(CycleError::Local(err))) => {
                self.set_status(SyncStatus::Idle);
                Err(err)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "sync cycle timed out"
                );
                self.set_status(SyncStatus::Offline);
                self.observer.sync_failed(&SyncFailure {
                    status: SyncStatus::Offline,
                    message: "sync cycle timed out".to_string(),
                    attempts: 1,
                });
                Ok(SyncStatus::Offline)
            }
        }
    }

    /// The cycle proper: pull, merge, resolve, persist, push, repair.
    ///
    /// Everything up to the persist step is computed on an in-memory
    /// snapshot; the local store changes only in the single
    /// [`OperationQueue::commit_merge`] critical section, so a failure at
    /// any earlier point leaves no partial state behind.
    async fn run_cycle(&self) -> Result<SyncOutcome, CycleError> {
        self.queue.flush_pending().await?;

        // Pull: the remote listing, the remote list record, and the body
        // of every remote note whose content differs from ours.
        let entries = self
            .with_retry("list remote", || self.remote.list_remote())
            .await?;
        let remote_list = match entries.iter().find(|e| e.id == LIST_RECORD_KEY) {
            Some(entry) => {
                let body = self
                    .with_retry("download list record", || self.remote.download(&entry.id))
                    .await?;
                serde_json::from_str::<NoteListRecord>(&body).map_err(|e| {
                    CycleError::Remote(RemoteError::Protocol(format!("list record: {e}")), 1)
                })?
            }
            // Nothing up there yet: first sync against an empty remote
            None => NoteListRecord::default(),
        };

        let local_list = self.queue.store().load_list()?;
        let disk_notes = self.queue.store().load_all_notes()?;
        let local_notes: HashMap<Uuid, Note> =
            disk_notes.into_iter().map(|n| (n.id, n)).collect();
        let snapshot_ids: HashSet<Uuid> = local_notes.keys().copied().collect();

        let mut pulled = 0usize;
        let mut remote_notes: HashMap<Uuid, Note> = HashMap::new();
        for meta in &remote_list.notes {
            if let Some(local) = local_notes.get(&meta.id) {
                if local.fingerprint == meta.fingerprint {
                    // Same content on both sides; the list record carries
                    // the remote metadata, so no download is needed.
                    let mut note = local.clone();
                    note.title = meta.title.clone();
                    note.preview = meta.preview.clone();
                    note.language = meta.language.clone();
                    note.modified_at = meta.modified_at;
                    note.archived = meta.archived;
                    note.folder_id = meta.folder_id;
                    remote_notes.insert(note.id, note);
                    continue;
                }
            }
            let key = meta.id.simple().to_string();
            match self
                .with_retry("download note", || self.remote.download(&key))
                .await
            {
                Ok(body) => match serde_json::from_str::<Note>(&body) {
                    Ok(note) => {
                        pulled += 1;
                        remote_notes.insert(meta.id, note);
                    }
                    Err(e) => {
                        tracing::warn!(
                            note_id = %meta.id.simple(),
                            error = %e,
                            "remote note body unreadable"
                        );
                        self.keep_local_for_missing_body(meta.id, &local_notes, &mut remote_notes);
                    }
                },
                Err(CycleError::Remote(RemoteError::NotFound(_), _)) => {
                    // The list record still names this note, so it was not
                    // deleted deliberately (a deletion removes the list
                    // entry too). The remote side lost the body; a local
                    // copy must survive and gets re-pushed.
                    tracing::warn!(
                        note_id = %meta.id.simple(),
                        "remote note listed but body missing"
                    );
                    self.keep_local_for_missing_body(meta.id, &local_notes, &mut remote_notes);
                }
                Err(e) => return Err(e),
            }
        }

        // Merge and resolve, all in memory.
        let snapshot = SyncSnapshot {
            local_list,
            remote_list,
            local_notes,
            remote_notes,
            local_client: Some(self.client_id.clone()),
        };
        let remote_canonical = snapshot.remote_is_primary();
        let outcome = merge(&snapshot);
        let metadata_merges = outcome.metadata_merges;
        let resolution = resolve(outcome, remote_canonical, Utc::now());
        if resolution.conflict_count() > 0 {
            self.observer.conflicts_detected(resolution.conflict_count());
        }

        if self.cancelled.swap(false, Ordering::SeqCst) {
            return Err(CycleError::Cancelled);
        }

        // Persist: one critical section on the queue. Only notes the
        // snapshot saw may be pruned; anything created since stays.
        let keep: HashSet<Uuid> = resolution.merged_notes.iter().map(|n| n.id).collect();
        let pruned: Vec<Uuid> = snapshot_ids
            .iter()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect();
        self.queue
            .commit_merge(
                resolution.merged.clone(),
                &resolution.merged_notes,
                &pruned,
                &snapshot.local_notes,
                Utc::now(),
                &self.client_id,
            )
            .await?;

        // Push: changed note bodies first, removals next, the list record
        // last, so the published list never references a missing note.
        // The persisted list is the source of truth here: a note the commit
        // kept over the merge (edited mid-cycle) pushes its durable record,
        // not the merge result, so body and metadata stay consistent.
        let final_list = self.queue.store().load_list()?;
        let remote_fingerprints: HashMap<Uuid, &str> = snapshot
            .remote_list
            .notes
            .iter()
            .map(|m| (m.id, m.fingerprint.as_str()))
            .collect();
        let merged_by_id: HashMap<Uuid, &Note> = resolution
            .merged_notes
            .iter()
            .map(|n| (n.id, n))
            .collect();
        let mut pushed = 0usize;
        for meta in &final_list.notes {
            if remote_fingerprints.get(&meta.id) == Some(&meta.fingerprint.as_str()) {
                continue;
            }
            let body = match merged_by_id.get(&meta.id) {
                Some(note) if note.fingerprint == meta.fingerprint => {
                    serde_json::to_string(*note).map_err(NoteError::from)?
                }
                _ => match self.queue.store().load(meta.id) {
                    Ok(disk) => serde_json::to_string(&disk).map_err(NoteError::from)?,
                    // Raced a local delete; the next cycle settles it
                    Err(NoteError::NotFound(_)) => continue,
                    Err(e) => return Err(e.into()),
                },
            };
            let key = meta.id.simple().to_string();
            self.with_retry("upload note", || self.remote.upload(&key, &body))
                .await?;
            pushed += 1;
        }

        let keep_keys: HashSet<String> = final_list
            .notes
            .iter()
            .map(|m| m.id.simple().to_string())
            .collect();
        let mut deleted_remote = 0usize;
        for entry in &entries {
            if entry.id == LIST_RECORD_KEY || keep_keys.contains(&entry.id) {
                continue;
            }
            // Entries that are not note ids belong to someone else
            if validate_entity_id(&entry.id, "remote entry id").is_err() {
                continue;
            }
            self.with_retry("delete remote note", || self.remote.delete(&entry.id))
                .await?;
            deleted_remote += 1;
        }

        let body = serde_json::to_string(&final_list).map_err(NoteError::from)?;
        self.with_retry("upload list record", || {
            self.remote.upload(LIST_RECORD_KEY, &body)
        })
        .await?;

        // Post-cycle integrity pass over the converged store.
        let integrity = self.queue.run_integrity().await?;
        self.observer.integrity_repaired(&integrity);

        Ok(SyncOutcome {
            pulled,
            pushed,
            deleted_remote,
            conflicts: resolution.conflicts,
            metadata_merges,
            integrity,
        })
    }

    /// When a note's body cannot be fetched but its metadata is still in
    /// the remote list record, stand in the local copy so the merge sees
    /// the note as present on both sides instead of deleted remotely.
    fn keep_local_for_missing_body(
        &self,
        id: Uuid,
        local_notes: &HashMap<Uuid, Note>,
        remote_notes: &mut HashMap<Uuid, Note>,
    ) {
        if let Some(local) = local_notes.get(&id) {
            remote_notes.insert(id, local.clone());
        }
    }

    /// Run a remote call, retrying transient failures with exponential
    /// backoff up to the configured bound.
    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, CycleError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.min(16));
                    attempt += 1;
                    tracing::debug!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient remote error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(CycleError::Remote(err, attempt + 1)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderEntry;
    use crate::observer::NullObserver;
    use crate::remote::RemoteEntry;
    use crate::store::LocalNoteStore;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    /// Pauses note-body downloads until released, so a test can interleave
    /// queue operations with a running cycle at a deterministic point.
    #[derive(Clone)]
    struct DownloadGate {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    impl DownloadGate {
        fn new() -> Self {
            Self {
                entered: Arc::new(tokio::sync::Notify::new()),
                release: Arc::new(tokio::sync::Notify::new()),
            }
        }
    }

    /// In-memory remote with failure injection.
    struct MockRemote {
        files: StdMutex<HashMap<String, String>>,
        list_calls: AtomicU32,
        fail_network: AtomicU32,
        fail_auth: AtomicBool,
        hang: AtomicBool,
        download_gate: StdMutex<Option<DownloadGate>>,
        active: AtomicU32,
        max_active: AtomicU32,
    }

    impl MockRemote {
        fn new() -> Self {
            Self {
                files: StdMutex::new(HashMap::new()),
                list_calls: AtomicU32::new(0),
                fail_network: AtomicU32::new(0),
                fail_auth: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                download_gate: StdMutex::new(None),
                active: AtomicU32::new(0),
                max_active: AtomicU32::new(0),
            }
        }

        fn gate_downloads(&self) -> DownloadGate {
            let gate = DownloadGate::new();
            *self.download_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn seed_note(&self, note: &Note) {
            self.files
                .lock()
                .unwrap()
                .insert(note.id_hex(), serde_json::to_string(note).unwrap());
        }

        fn seed_list(&self, list: &NoteListRecord) {
            self.files
                .lock()
                .unwrap()
                .insert(LIST_RECORD_KEY.to_string(), serde_json::to_string(list).unwrap());
        }

        fn stored_list(&self) -> Option<NoteListRecord> {
            self.files
                .lock()
                .unwrap()
                .get(LIST_RECORD_KEY)
                .map(|body| serde_json::from_str(body).unwrap())
        }

        fn stored_note(&self, id: Uuid) -> Option<Note> {
            self.files
                .lock()
                .unwrap()
                .get(&id.simple().to_string())
                .map(|body| serde_json::from_str(body).unwrap())
        }

        fn file_count(&self) -> usize {
            self.files.lock().unwrap().len()
        }

        fn fail_next(&self, calls: u32) {
            self.fail_network.store(calls, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), RemoteError> {
            if self.fail_auth.load(Ordering::SeqCst) {
                return Err(RemoteError::Auth("token rejected".to_string()));
            }
            let failing = self
                .fail_network
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RemoteError::Network("connection reset".to_string()));
            }
            Ok(())
        }
    }

    impl RemoteStore for MockRemote {
        async fn list_remote(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.check()?;
            let files = self.files.lock().unwrap();
            Ok(files
                .keys()
                .map(|id| RemoteEntry {
                    id: id.clone(),
                    name: id.clone(),
                    modified_at: None,
                    fingerprint: None,
                })
                .collect())
        }

        async fn download(&self, remote_ref: &str) -> Result<String, RemoteError> {
            let gate = self.download_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                if remote_ref != LIST_RECORD_KEY {
                    gate.entered.notify_one();
                    gate.release.notified().await;
                }
            }
            self.check()?;
            self.files
                .lock()
                .unwrap()
                .get(remote_ref)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(remote_ref.to_string()))
        }

        async fn upload(&self, id: &str, content: &str) -> Result<String, RemoteError> {
            self.check()?;
            self.files
                .lock()
                .unwrap()
                .insert(id.to_string(), content.to_string());
            Ok(id.to_string())
        }

        async fn delete(&self, id: &str) -> Result<(), RemoteError> {
            self.check()?;
            self.files.lock().unwrap().remove(id);
            Ok(())
        }
    }

    fn test_engine(
        remote: MockRemote,
    ) -> (Arc<SyncEngine<MockRemote, NullObserver>>, Arc<OperationQueue>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalNoteStore::open(dir.path()).unwrap();
        let queue = Arc::new(OperationQueue::new(store));
        let engine = SyncEngine::with_limits(
            queue.clone(),
            remote,
            NullObserver,
            "client-a".to_string(),
            Duration::from_secs(60),
            2,
        );
        (Arc::new(engine), queue, dir)
    }

    #[tokio::test]
    async fn test_first_sync_pushes_local_notes_to_empty_remote() {
        let (engine, queue, _dir) = test_engine(MockRemote::new());
        let note = Note::new("First", "hello world");
        queue.save_note(note.clone()).await.unwrap();

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);

        let remote_list = engine.remote().stored_list().unwrap();
        assert!(remote_list.note(note.id).is_some());
        assert!(remote_list.last_sync.is_some());
        assert_eq!(remote_list.last_sync_client.as_deref(), Some("client-a"));
        assert_eq!(
            engine.remote().stored_note(note.id).unwrap().content,
            "hello world"
        );

        let local_list = queue.store().load_list().unwrap();
        assert!(local_list.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_pull_populates_empty_local_store() {
        let remote = MockRemote::new();
        let note = Note::new("From elsewhere", "remote content");
        let mut list = NoteListRecord::default();
        list.notes.push(note.metadata());
        list.top_level_order.push(OrderEntry::note(note.id));
        list.last_sync = Some(Utc::now());
        list.last_sync_client = Some("client-b".to_string());
        remote.seed_note(&note);
        remote.seed_list(&list);

        let (engine, queue, _dir) = test_engine(remote);
        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);

        let pulled = queue.store().load(note.id).unwrap();
        assert_eq!(pulled.content, "remote content");
        let local_list = queue.store().load_list().unwrap();
        assert!(local_list
            .top_level_order
            .iter()
            .any(|e| e.id == note.id));
    }

    #[tokio::test]
    async fn test_divergent_edit_creates_conflict_copy_locally_and_remotely() {
        let base = Note::new("Shared", "base text");
        let baseline = Utc::now() - chrono::Duration::minutes(10);

        // Local replica: synced at baseline, then edited.
        let mut local = base.clone();
        local.set_content("local edit");
        let mut local_list = NoteListRecord::default();
        local_list.notes.push(local.metadata());
        local_list.top_level_order.push(OrderEntry::note(local.id));
        local_list.last_sync = Some(baseline);
        local_list.last_sync_client = Some("client-a".to_string());

        // Remote replica: synced more recently, edited differently.
        let mut remote_note = base.clone();
        remote_note.set_content("remote edit");
        let mut remote_list = NoteListRecord::default();
        remote_list.notes.push(remote_note.metadata());
        remote_list
            .top_level_order
            .push(OrderEntry::note(remote_note.id));
        remote_list.last_sync = Some(Utc::now());
        remote_list.last_sync_client = Some("client-b".to_string());

        let remote = MockRemote::new();
        remote.seed_note(&remote_note);
        remote.seed_list(&remote_list);

        let (engine, queue, _dir) = test_engine(remote);
        queue.store().save(&local).unwrap();
        queue.store().save_list(&local_list).unwrap();

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);

        // Remote was primary, so the original id keeps the remote text
        // and a conflict copy holds the local text.
        let canonical = queue.store().load(base.id).unwrap();
        assert_eq!(canonical.content, "remote edit");

        let list = queue.store().load_list().unwrap();
        assert_eq!(list.notes.len(), 2);
        let copy_meta = list.notes.iter().find(|m| m.id != base.id).unwrap();
        assert!(copy_meta.title.contains("conflicted copy"));
        let copy = queue.store().load(copy_meta.id).unwrap();
        assert_eq!(copy.content, "local edit");

        // Conflict completeness: the copy made it into the same push.
        let pushed_list = engine.remote().stored_list().unwrap();
        assert!(pushed_list.note(copy_meta.id).is_some());
        assert!(engine.remote().stored_note(copy_meta.id).is_some());
    }

    #[tokio::test]
    async fn test_metadata_only_edit_merges_without_conflict() {
        let base = Note::new("Old title", "same text");
        let baseline = Utc::now() - chrono::Duration::minutes(10);

        let mut local_list = NoteListRecord::default();
        local_list.notes.push(base.metadata());
        local_list.top_level_order.push(OrderEntry::note(base.id));
        local_list.last_sync = Some(baseline);

        let mut renamed = base.clone();
        renamed.title = "New title".to_string();
        renamed.modified_at = Utc::now();
        let mut remote_list = NoteListRecord::default();
        remote_list.notes.push(renamed.metadata());
        remote_list
            .top_level_order
            .push(OrderEntry::note(renamed.id));
        remote_list.last_sync = Some(Utc::now());

        let remote = MockRemote::new();
        remote.seed_note(&renamed);
        remote.seed_list(&remote_list);

        let (engine, queue, _dir) = test_engine(remote);
        queue.store().save(&base).unwrap();
        queue.store().save_list(&local_list).unwrap();

        engine.sync(false).await.unwrap();

        let list = queue.store().load_list().unwrap();
        assert_eq!(list.notes.len(), 1);
        assert_eq!(list.notes[0].title, "New title");
    }

    #[tokio::test]
    async fn test_remote_deletion_prunes_unchanged_local_note() {
        let base = Note::new("Doomed", "text");
        let baseline = Utc::now() - chrono::Duration::minutes(10);

        let mut stale = base.clone();
        stale.modified_at = baseline - chrono::Duration::minutes(5);
        let mut local_list = NoteListRecord::default();
        local_list.notes.push(stale.metadata());
        local_list.top_level_order.push(OrderEntry::note(stale.id));
        local_list.last_sync = Some(baseline);

        // The other replica deleted the note after the shared baseline.
        let mut remote_list = NoteListRecord::default();
        remote_list.last_sync = Some(Utc::now());

        let remote = MockRemote::new();
        remote.seed_list(&remote_list);

        let (engine, queue, _dir) = test_engine(remote);
        queue.store().save(&stale).unwrap();
        queue.store().save_list(&local_list).unwrap();

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);

        assert!(queue.store().load(stale.id).is_err());
        let list = queue.store().load_list().unwrap();
        assert!(list.note(stale.id).is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_suspends_until_credentials_refreshed() {
        let remote = MockRemote::new();
        remote.fail_auth.store(true, Ordering::SeqCst);
        let (engine, _queue, _dir) = test_engine(remote);

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::AuthRequired);
        let calls = engine.remote().list_calls.load(Ordering::SeqCst);

        // Suspended: further non-forced requests never touch the remote.
        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::AuthRequired);
        assert_eq!(engine.remote().list_calls.load(Ordering::SeqCst), calls);

        engine.remote().fail_auth.store(false, Ordering::SeqCst);
        engine.credentials_refreshed();
        assert_eq!(engine.status(), SyncStatus::Idle);
        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_goes_offline() {
        let remote = MockRemote::new();
        remote.fail_next(100);
        let (engine, _queue, _dir) = test_engine(remote);

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Offline);
        // max_retries = 2 means three attempts total
        assert_eq!(engine.remote().list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_retry_budget() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let (engine, queue, _dir) = test_engine(remote);
        queue.save_note(Note::new("N", "c")).await.unwrap();

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);
        assert!(engine.remote().stored_list().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_cycle_times_out_to_offline() {
        let remote = MockRemote::new();
        remote.hang.store(true, Ordering::SeqCst);
        let dir = TempDir::new().unwrap();
        let store = LocalNoteStore::open(dir.path()).unwrap();
        let queue = Arc::new(OperationQueue::new(store));
        let engine = SyncEngine::with_limits(
            queue,
            remote,
            NullObserver,
            "client-a".to_string(),
            Duration::from_millis(200),
            0,
        );

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Offline);
    }

    #[tokio::test]
    async fn test_concurrent_sync_requests_coalesce() {
        let (engine, queue, _dir) = test_engine(MockRemote::new());
        queue.save_note(Note::new("N", "c")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.sync(false).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Never more than one cycle against the remote at a time.
        assert_eq!(engine.remote().max_active.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_startup_repairs_then_syncs() {
        let (engine, queue, _dir) = test_engine(MockRemote::new());
        // An orphan record with no list entry
        let orphan = Note::new("Orphan", "content");
        queue.store().save(&orphan).unwrap();

        let report = engine.startup().await.unwrap();
        assert_eq!(report.orphans_restored, 1);

        // The restored note made it into the first push
        let remote_list = engine.remote().stored_list().unwrap();
        assert!(remote_list.note(orphan.id).is_some());
    }

    #[tokio::test]
    async fn test_unchanged_note_is_not_reuploaded() {
        let (engine, queue, _dir) = test_engine(MockRemote::new());
        let note = Note::new("Stable", "unchanging");
        queue.save_note(note.clone()).await.unwrap();

        engine.sync(false).await.unwrap();
        let files_after_first = engine.remote().file_count();

        // Second cycle with nothing changed: only the list record moves.
        engine.sync(false).await.unwrap();
        assert_eq!(engine.remote().file_count(), files_after_first);
        assert_eq!(
            engine.remote().stored_note(note.id).unwrap().content,
            "unchanging"
        );
    }

    #[tokio::test]
    async fn test_edit_during_cycle_survives_persist() {
        let remote = MockRemote::new();
        // A remote-only note forces a body download, which the gate holds
        // open while the user keeps typing.
        let incoming = Note::new("Incoming", "from another device");
        let mut remote_list = NoteListRecord::default();
        remote_list.notes.push(incoming.metadata());
        remote_list
            .top_level_order
            .push(OrderEntry::note(incoming.id));
        remote_list.last_sync = Some(Utc::now());
        remote.seed_note(&incoming);
        remote.seed_list(&remote_list);
        let gate = remote.gate_downloads();

        let (engine, queue, _dir) = test_engine(remote);
        let note = Note::new("Doc", "v1");
        queue.save_note(note.clone()).await.unwrap();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.sync(false).await });
        gate.entered.notified().await;

        // The cycle has its snapshot; this edit lands in between.
        let mut edited = note.clone();
        edited.set_content("v2 typed during sync");
        queue.save_note(edited.clone()).await.unwrap();
        gate.release.notify_one();
        let status = handle.await.unwrap().unwrap();
        assert_eq!(status, SyncStatus::Idle);

        // The mid-cycle edit survives the persist step, and the push
        // carried the durable record, not the stale merge input.
        assert_eq!(
            queue.store().load(note.id).unwrap().content,
            "v2 typed during sync"
        );
        let list = queue.store().load_list().unwrap();
        assert_eq!(list.note(note.id).unwrap().fingerprint, edited.fingerprint);
        assert_eq!(
            engine.remote().stored_note(note.id).unwrap().content,
            "v2 typed during sync"
        );
        assert_eq!(
            engine
                .remote()
                .stored_list()
                .unwrap()
                .note(note.id)
                .unwrap()
                .fingerprint,
            edited.fingerprint
        );
        // The pull itself still landed
        assert!(queue.store().load(incoming.id).is_ok());
    }

    #[tokio::test]
    async fn test_missing_remote_body_keeps_local_copy() {
        let base = Note::new("Survivor", "kept text");
        let baseline = Utc::now() - chrono::Duration::minutes(10);

        let mut local = base.clone();
        local.modified_at = baseline - chrono::Duration::minutes(5);
        let mut local_list = NoteListRecord::default();
        local_list.notes.push(local.metadata());
        local_list.top_level_order.push(OrderEntry::note(local.id));
        local_list.last_sync = Some(baseline);

        // The remote list still names the note (with an edited
        // fingerprint), but its body file is gone.
        let mut ghost = base.clone();
        ghost.set_content("body the remote lost");
        let mut remote_list = NoteListRecord::default();
        remote_list.notes.push(ghost.metadata());
        remote_list.top_level_order.push(OrderEntry::note(ghost.id));
        remote_list.last_sync = Some(Utc::now());

        let remote = MockRemote::new();
        remote.seed_list(&remote_list);

        let (engine, queue, _dir) = test_engine(remote);
        queue.store().save(&local).unwrap();
        queue.store().save_list(&local_list).unwrap();

        let status = engine.sync(false).await.unwrap();
        assert_eq!(status, SyncStatus::Idle);

        // The local copy survives and gets re-pushed as the new body.
        assert_eq!(queue.store().load(base.id).unwrap().content, "kept text");
        assert_eq!(
            engine.remote().stored_note(base.id).unwrap().content,
            "kept text"
        );
        assert!(engine
            .remote()
            .stored_list()
            .unwrap()
            .note(base.id)
            .is_some());
    }

    #[tokio::test]
    async fn test_cancel_mid_cycle_discards_result() {
        let remote = MockRemote::new();
        let incoming = Note::new("Incoming", "remote content");
        let mut remote_list = NoteListRecord::default();
        remote_list.notes.push(incoming.metadata());
        remote_list
            .top_level_order
            .push(OrderEntry::note(incoming.id));
        remote_list.last_sync = Some(Utc::now());
        remote.seed_note(&incoming);
        remote.seed_list(&remote_list);
        let gate = remote.gate_downloads();

        let (engine, queue, _dir) = test_engine(remote);
        queue.save_note(Note::new("Local", "text")).await.unwrap();
        let files_before = engine.remote().file_count();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.sync(false).await });
        gate.entered.notified().await;
        engine.cancel();
        gate.release.notify_one();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, NoteError::Cancelled));
        assert_eq!(engine.status(), SyncStatus::Idle);

        // Nothing was persisted or pushed.
        assert!(queue.store().load(incoming.id).is_err());
        assert!(queue.store().load_list().unwrap().last_sync.is_none());
        assert_eq!(engine.remote().file_count(), files_before);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_autosave() {
        let (engine, queue, _dir) = test_engine(MockRemote::new());
        let note = Note::new("Draft", "half-typed");
        queue.schedule_save(note.clone());

        engine.shutdown().await.unwrap();
        assert!(!queue.has_pending());
        assert_eq!(queue.store().load(note.id).unwrap().content, "half-typed");
    }
}
