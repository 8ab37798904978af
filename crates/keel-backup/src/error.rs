//! Error types for the backup manager.

use std::io;

use keel_cluster::ClusterError;
use thiserror::Error;

use crate::snapshot::SnapshotId;

/// A snapshot capture step failed. The latest pointer was not moved.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to capture {artifact}: {source}")]
    Cluster {
        artifact: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to write {artifact}: {source}")]
    Io {
        artifact: String,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    /// Name of the artifact whose capture failed.
    pub fn artifact(&self) -> &str {
        match self {
            CaptureError::Cluster { artifact, .. } | CaptureError::Io { artifact, .. } => artifact,
        }
    }

    pub(crate) fn io(artifact: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let artifact = artifact.into();
        move |source| CaptureError::Io { artifact, source }
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("failed to read snapshot {id}: {source}")]
    Io {
        id: SnapshotId,
        #[source]
        source: io::Error,
    },

    #[error("database restore from snapshot {id} failed: {source}")]
    Database {
        id: SnapshotId,
        #[source]
        source: ClusterError,
    },
}
