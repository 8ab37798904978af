//! Release phases and terminal outcomes.
//!
//! A run moves strictly forward through
//! `PreCheck → Backup → Deploy(1..n) → HealthCheck → PostVerify → Cleanup → Succeeded`.
//! Any failure jumps to `Failed`, passing through `Rollback` first when a
//! snapshot was taken by this run.

use std::fmt;

use keel_backup::{RestoreError, RestoreReport, SnapshotId};
use keel_health::HealthCheckResult;

use crate::error::RunError;

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    PreCheck,
    Backup,
    /// Applying stage `index` (1-based) of `total`.
    Deploy {
        stage: String,
        index: usize,
        total: usize,
    },
    HealthCheck,
    PostVerify,
    Cleanup,
    Rollback,
    Succeeded,
    Failed,
    Interrupted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed | Phase::Interrupted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreCheck => f.write_str("pre-check"),
            Phase::Backup => f.write_str("backup"),
            Phase::Deploy { stage, index, total } => {
                write!(f, "deploy {stage} ({index}/{total})")
            }
            Phase::HealthCheck => f.write_str("health-check"),
            Phase::PostVerify => f.write_str("post-verify"),
            Phase::Cleanup => f.write_str("cleanup"),
            Phase::Rollback => f.write_str("rollback"),
            Phase::Succeeded => f.write_str("succeeded"),
            Phase::Failed => f.write_str("failed"),
            Phase::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// What happened to the automatic rollback of a failed run.
#[derive(Debug)]
pub enum RollbackAttempt {
    /// The run failed before any snapshot existed.
    NotAttempted,
    Restored(RestoreReport),
    Failed(RestoreError),
}

impl RollbackAttempt {
    pub fn was_attempted(&self) -> bool {
        !matches!(self, RollbackAttempt::NotAttempted)
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded {
        snapshot: SnapshotId,
        health: HealthCheckResult,
    },
    /// Dry run: every manifest passed server-side validation.
    Validated { manifests: usize },
    /// Operator-requested rollback finished.
    RolledBack(RestoreReport),
    Failed {
        /// Phase the failure happened in.
        phase: Phase,
        error: RunError,
        rollback: RollbackAttempt,
    },
    /// A termination signal arrived during `phase`. No rollback is attempted.
    Interrupted { phase: Phase },
}

impl RunOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded { .. }
            | RunOutcome::Validated { .. }
            | RunOutcome::RolledBack(_) => 0,
            RunOutcome::Failed { .. } => 1,
            RunOutcome::Interrupted { .. } => 130,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}
