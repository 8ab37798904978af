//! BackupManager — capture before mutation, restore on rollback, prune by age.

use std::fs;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keel_cluster::{ApplyMode, ClusterApi};
use keel_core::{DatabaseConfig, ResourceKind};
use tracing::{debug, info, warn};

use crate::error::{CaptureError, RestoreError};
use crate::snapshot::{DUMP_FILE, Snapshot, SnapshotId, SnapshotMeta};
use crate::store::BackupStore;

/// Outcome of a restore that reached the end of the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    pub snapshot: SnapshotId,
    /// Manifests re-applied, in restore order.
    pub restored: Vec<ResourceKind>,
    /// Manifests the API refused or that were missing from the snapshot.
    pub failed: Vec<ResourceKind>,
    pub database_restored: bool,
}

/// What a retention sweep did. Failures are reported here, never raised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub removed: Vec<SnapshotId>,
    pub kept: Vec<SnapshotId>,
    pub failed: Vec<SnapshotId>,
}

/// Captures and restores snapshots of one namespace.
pub struct BackupManager<'a, C> {
    cluster: &'a C,
    store: BackupStore,
    namespace: String,
    database: Option<DatabaseConfig>,
}

impl<'a, C: ClusterApi> BackupManager<'a, C> {
    pub fn new(
        cluster: &'a C,
        store: BackupStore,
        namespace: &str,
        database: Option<DatabaseConfig>,
    ) -> Self {
        Self {
            cluster,
            store,
            namespace: namespace.to_string(),
            database,
        }
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Capture resource manifests and the database dump into a new snapshot.
    ///
    /// The latest pointer moves only after every artifact is on disk. A
    /// failed capture leaves its partial directory behind for inspection.
    pub async fn create_backup(&self) -> Result<Snapshot, CaptureError> {
        let now = Utc::now();
        let (id, dir) = self
            .store
            .allocate(now)
            .map_err(CaptureError::io("snapshot directory"))?;
        info!(snapshot = %id, namespace = %self.namespace, "capturing snapshot");

        for kind in ResourceKind::CAPTURE_ORDER {
            let yaml = self
                .cluster
                .get(&self.namespace, kind)
                .await
                .map_err(|source| CaptureError::Cluster {
                    artifact: kind.to_string(),
                    source,
                })?;
            fs::write(dir.join(kind.file_name()), yaml)
                .map_err(CaptureError::io(kind.to_string()))?;
            debug!(snapshot = %id, %kind, "captured manifests");
        }

        let has_database_dump = match &self.database {
            Some(db) => {
                let dump = self
                    .cluster
                    .exec(&self.namespace, &db.workload, &db.dump_command, None)
                    .await
                    .map_err(|source| CaptureError::Cluster {
                        artifact: "database dump".to_string(),
                        source,
                    })?;
                fs::write(dir.join(DUMP_FILE), &dump)
                    .map_err(CaptureError::io("database dump"))?;
                debug!(snapshot = %id, bytes = dump.len(), "captured database dump");
                true
            }
            None => false,
        };

        let meta = SnapshotMeta {
            id: id.clone(),
            created_at: now,
            namespace: self.namespace.clone(),
            kinds: ResourceKind::CAPTURE_ORDER.to_vec(),
            has_database_dump,
        };
        self.store
            .write_meta(&meta)
            .map_err(CaptureError::io("snapshot metadata"))?;
        self.store
            .set_latest(&id)
            .map_err(CaptureError::io("latest pointer"))?;

        info!(snapshot = %id, has_database_dump, "snapshot complete");
        Ok(Snapshot {
            meta,
            dir,
            complete: true,
        })
    }

    /// Restore a snapshot over live state; `None` targets the latest pointer.
    ///
    /// Manifest failures are logged and skipped. A missing dump is fine; a
    /// dump that fails to load is not.
    pub async fn restore_backup(
        &self,
        id: Option<&SnapshotId>,
    ) -> Result<RestoreReport, RestoreError> {
        let id = match id {
            Some(id) => id.clone(),
            None => self
                .store
                .latest()
                .map_err(|e| {
                    RestoreError::NotFound(format!("unreadable latest pointer: {e}"))
                })?
                .ok_or_else(|| {
                    RestoreError::NotFound(format!(
                        "no latest pointer under {}",
                        self.store.root().display()
                    ))
                })?,
        };

        let snapshot = self
            .store
            .load(&id)
            .map_err(|source| RestoreError::Io {
                id: id.clone(),
                source,
            })?
            .ok_or_else(|| RestoreError::NotFound(id.to_string()))?;

        info!(snapshot = %id, namespace = %self.namespace, "restoring snapshot");
        if !snapshot.complete {
            warn!(snapshot = %id, "snapshot has no metadata, restoring what is present");
        }

        let mut restored = Vec::new();
        let mut failed = Vec::new();
        for kind in ResourceKind::RESTORE_ORDER {
            let path = snapshot.manifest_path(kind);
            let yaml = match fs::read_to_string(&path) {
                Ok(yaml) => yaml,
                Err(e) => {
                    warn!(snapshot = %id, %kind, error = %e, "manifest missing from snapshot");
                    failed.push(kind);
                    continue;
                }
            };
            if is_empty_list(&yaml) {
                // Nothing existed at capture time; kubectl refuses an empty apply.
                debug!(snapshot = %id, %kind, "no objects captured, nothing to restore");
                restored.push(kind);
                continue;
            }
            match self.cluster.apply(&path, ApplyMode::ForceReplace).await {
                Ok(()) => {
                    debug!(snapshot = %id, %kind, "manifests restored");
                    restored.push(kind);
                }
                Err(e) => {
                    warn!(snapshot = %id, %kind, error = %e, "manifest restore failed, continuing");
                    failed.push(kind);
                }
            }
        }

        let database_restored = self.restore_dump(&snapshot).await?;

        info!(
            snapshot = %id,
            restored = restored.len(),
            failed = failed.len(),
            database_restored,
            "restore finished"
        );
        Ok(RestoreReport {
            snapshot: id,
            restored,
            failed,
            database_restored,
        })
    }

    async fn restore_dump(&self, snapshot: &Snapshot) -> Result<bool, RestoreError> {
        if !snapshot.has_dump() {
            debug!(snapshot = %snapshot.id(), "no database dump in snapshot");
            return Ok(false);
        }
        let Some(db) = &self.database else {
            warn!(snapshot = %snapshot.id(), "snapshot has a dump but no database is configured");
            return Ok(false);
        };

        let dump = fs::read(snapshot.dump_path()).map_err(|source| RestoreError::Io {
            id: snapshot.id().clone(),
            source,
        })?;
        self.cluster
            .exec(&self.namespace, &db.workload, &db.restore_command, Some(&dump))
            .await
            .map_err(|source| RestoreError::Database {
                id: snapshot.id().clone(),
                source,
            })?;
        Ok(true)
    }

    /// Remove snapshots older than `retention_days`, sparing the latest.
    pub fn prune_old_backups(&self, retention_days: u32) -> PruneReport {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        self.prune_before(cutoff)
    }

    /// Remove snapshots created before `cutoff`, sparing the latest.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> PruneReport {
        let mut report = PruneReport::default();

        let latest = match self.store.latest() {
            Ok(latest) => latest,
            Err(e) => {
                // Without a trustworthy pointer nothing is provably safe to delete.
                warn!(error = %e, "latest pointer unreadable, skipping prune");
                return report;
            }
        };
        let snapshots = match self.store.list() {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "cannot list backups, skipping prune");
                return report;
            }
        };

        for snapshot in snapshots {
            let id = snapshot.id().clone();
            if latest.as_ref() == Some(&id) || snapshot.meta.created_at >= cutoff {
                report.kept.push(id);
                continue;
            }
            match self.store.remove(&id) {
                Ok(()) => {
                    debug!(snapshot = %id, "pruned snapshot");
                    report.removed.push(id);
                }
                Err(e) => {
                    warn!(snapshot = %id, error = %e, "failed to prune snapshot");
                    report.failed.push(id);
                }
            }
        }

        info!(
            removed = report.removed.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            "backup retention sweep finished"
        );
        report
    }

    /// All snapshots, oldest first.
    pub fn list_snapshots(&self) -> std::io::Result<Vec<Snapshot>> {
        self.store.list()
    }
}

/// True for a `kubectl get -o yaml` list that holds no objects.
fn is_empty_list(yaml: &str) -> bool {
    yaml.lines().any(|line| line.trim_end() == "items: []")
}
