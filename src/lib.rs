//! NoteCore - sync, merge, and conflict-resolution engine for a
//! cloud-backed note store.
//!
//! This library keeps a local on-disk note store and a remote cloud drive
//! eventually consistent:
//! - Data models (Note, Folder, the single list record)
//! - Local file-per-note storage with atomic writes
//! - Content fingerprinting for cheap change detection
//! - Integrity repair (orphans, stale entries, order drift)
//! - Three-way merge against the shared sync baseline
//! - Conflict resolution via conflict copies (never silent data loss)
//! - A single-writer operation queue with debounced autosave
//! - A sync orchestrator with retry, backoff, and auth suspension
//!
//! The engine is headless: callers observe structured outcomes through
//! [`SyncObserver`] and render them however they like.

pub mod config;
pub mod conflicts;
pub mod error;
pub mod fingerprint;
pub mod integrity;
pub mod merge;
pub mod models;
pub mod observer;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;
pub mod validation;

// Re-export commonly used types
pub use config::EngineConfig;
pub use conflicts::{ConflictRecord, Resolution};
pub use error::{NoteError, NoteResult};
pub use fingerprint::content_fingerprint;
pub use integrity::IntegrityReport;
pub use merge::{MergeOutcome, SyncSnapshot};
pub use models::{Folder, Note, NoteListRecord, NoteMetadata, OrderEntry};
pub use observer::{NullObserver, SyncFailure, SyncObserver, SyncOutcome};
pub use queue::OperationQueue;
pub use remote::{HttpRemoteStore, RemoteEntry, RemoteError, RemoteStore};
pub use store::LocalNoteStore;
pub use sync::{SyncEngine, SyncStatus};
