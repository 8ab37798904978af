//! Error taxonomy for a release run.

use std::path::PathBuf;
use std::time::Duration;

use keel_backup::{CaptureError, RestoreError};
use keel_cluster::ClusterError;
use keel_health::HealthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Pre-check failed; nothing has been touched yet.
    #[error("environment check failed: {0}")]
    Environment(String),

    #[error("backup failed: {0}")]
    BackupCapture(#[from] CaptureError),

    #[error("stage {stage} rejected {}: {source}", manifest.display())]
    StageApply {
        stage: String,
        manifest: PathBuf,
        #[source]
        source: ClusterError,
    },

    #[error("stage {stage} not ready after {}s waiting for {predicate}", timeout.as_secs())]
    ReadinessTimeout {
        stage: String,
        predicate: String,
        timeout: Duration,
    },

    #[error(transparent)]
    HealthCheckExhausted(#[from] HealthError),

    #[error("restore failed: {0}")]
    Restore(#[from] RestoreError),

    /// A manifest failed server-side validation during a dry run.
    #[error("validation of {} failed: {source}", manifest.display())]
    Validation {
        manifest: PathBuf,
        #[source]
        source: ClusterError,
    },
}

impl RunError {
    /// Whether this error, raised after a snapshot exists, calls for rollback.
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            RunError::StageApply { .. }
                | RunError::ReadinessTimeout { .. }
                | RunError::HealthCheckExhausted(_)
        )
    }
}
