//! Rollback: restore a snapshot, then tell someone about it.

use keel_backup::{BackupManager, RestoreError, RestoreReport, SnapshotId};
use keel_cluster::ClusterApi;
use keel_notify::{Notification, Notifier, deliver_best_effort};
use tracing::{error, warn};

/// Restores snapshots on behalf of a failed run or an operator.
pub struct RollbackCoordinator<'a, C, N> {
    backups: &'a BackupManager<'a, C>,
    notifier: &'a N,
    namespace: &'a str,
}

impl<'a, C: ClusterApi, N: Notifier> RollbackCoordinator<'a, C, N> {
    pub fn new(backups: &'a BackupManager<'a, C>, notifier: &'a N, namespace: &'a str) -> Self {
        Self {
            backups,
            notifier,
            namespace,
        }
    }

    /// Restore `id`, or the latest snapshot when `None`.
    ///
    /// Either way a warning-level notification goes out, so rollbacks stand
    /// apart from plain failures.
    pub async fn rollback(&self, id: Option<&SnapshotId>) -> Result<RestoreReport, RestoreError> {
        let target = id.map_or_else(|| "latest".to_string(), SnapshotId::to_string);
        warn!(namespace = self.namespace, snapshot = %target, "rolling back");

        match self.backups.restore_backup(id).await {
            Ok(report) => {
                let mut text = format!(
                    "Rolled back {} to snapshot {}",
                    self.namespace, report.snapshot
                );
                if !report.failed.is_empty() {
                    let failed: Vec<&str> = report.failed.iter().map(|k| k.as_str()).collect();
                    text.push_str(&format!(" (not restored: {})", failed.join(", ")));
                }
                deliver_best_effort(self.notifier, &Notification::warning(text)).await;
                Ok(report)
            }
            Err(e) => {
                error!(namespace = self.namespace, snapshot = %target, error = %e, "rollback failed");
                let text = format!("Rollback of {} to {target} failed: {e}", self.namespace);
                deliver_best_effort(self.notifier, &Notification::warning(text)).await;
                Err(e)
            }
        }
    }
}
