//! keel-backup — snapshots taken before a release mutates anything.
//!
//! A snapshot is a directory holding the namespace's deployment, service,
//! config-map and secret manifests plus an optional database dump. A
//! single `latest` pointer file names the newest snapshot whose capture
//! fully succeeded; rollback always resolves through it.
//!
//! # Invariants
//!
//! - A snapshot is never modified after its capture finishes.
//! - `latest` is written last, via rename, and only after every capture
//!   step succeeded.
//! - The retention sweep never deletes the snapshot `latest` names.

pub mod error;
pub mod manager;
pub mod snapshot;
pub mod store;

pub use error::{CaptureError, RestoreError};
pub use manager::{BackupManager, PruneReport, RestoreReport};
pub use snapshot::{Snapshot, SnapshotId, SnapshotMeta};
pub use store::BackupStore;
