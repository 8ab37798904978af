//! The release state machine.
//!
//! One [`Orchestrator`] drives one run against one namespace: pre-check,
//! snapshot, staged apply, health gate, post-verify, cleanup. Failures after
//! the snapshot roll back to it. A termination signal stops the run where it
//! stands without rolling back.

use std::future::Future;
use std::io;
use std::sync::{Mutex, MutexGuard};

use keel_backup::{BackupManager, BackupStore, CaptureError, RestoreError, Snapshot, SnapshotId};
use keel_cluster::ClusterApi;
use keel_core::{KeelConfig, Stage};
use keel_health::{HealthPolicy, Probe, verify_health};
use keel_notify::{Notification, Notifier, deliver_best_effort};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::RunError;
use crate::phase::{Phase, RollbackAttempt, RunOutcome};
use crate::rollback::RollbackCoordinator;
use crate::stage::StageExecutor;

/// Namespace annotation recording the snapshot taken by the last good release.
pub const SNAPSHOT_ANNOTATION: &str = "keel.dev/last-snapshot";

/// Resource kinds summarized after a successful health check.
const STATUS_KINDS: [&str; 5] = ["pods", "services", "deployments", "ingress", "hpa"];

/// What a single invocation should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Deploy,
    /// Pre-check, then server-side validate every manifest.
    DryRun,
    /// Restore a named snapshot, or the latest.
    Rollback(Option<SnapshotId>),
}

pub struct Orchestrator<C, P, N> {
    config: KeelConfig,
    stages: Vec<Stage>,
    cluster: C,
    probe: P,
    notifier: N,
    phase: Mutex<Phase>,
}

impl<C: ClusterApi, P: Probe, N: Notifier> Orchestrator<C, P, N> {
    pub fn new(config: KeelConfig, cluster: C, probe: P, notifier: N) -> Self {
        let stages = config.stage_plan();
        Self {
            config,
            stages,
            cluster,
            probe,
            notifier,
            phase: Mutex::new(Phase::PreCheck),
        }
    }

    fn namespace(&self) -> &str {
        &self.config.run.namespace
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The phase the run is in, or ended in.
    pub fn phase(&self) -> Phase {
        self.lock_phase().clone()
    }

    fn enter(&self, phase: Phase) {
        debug!(%phase, "entering phase");
        *self.lock_phase() = phase;
    }

    fn backups(&self, store: BackupStore) -> BackupManager<'_, C> {
        BackupManager::new(
            &self.cluster,
            store,
            self.namespace(),
            self.config.database.clone(),
        )
    }

    pub async fn execute(&self, mode: &Mode) -> RunOutcome {
        match mode {
            Mode::Deploy => self.run().await,
            Mode::DryRun => self.dry_run().await,
            Mode::Rollback(id) => self.rollback(id.as_ref()).await,
        }
    }

    /// Execute `mode`, abandoning it if `signal` resolves first.
    ///
    /// An abandoned run is reported as interrupted in whatever phase it
    /// reached. Nothing is rolled back and no further cluster calls are made.
    pub async fn run_until<F>(&self, mode: &Mode, signal: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            outcome = self.execute(mode) => outcome,
            () = signal => self.interrupted().await,
        }
    }

    /// A full release.
    pub async fn run(&self) -> RunOutcome {
        let started = Instant::now();
        info!(namespace = self.namespace(), stages = self.stages.len(), "starting release");

        self.enter(Phase::PreCheck);
        if let Err(e) = self.pre_check().await {
            return self.fail(Phase::PreCheck, e, RollbackAttempt::NotAttempted).await;
        }

        self.enter(Phase::Backup);
        let backups = match BackupStore::open(&self.config.run.backup_dir) {
            Ok(store) => self.backups(store),
            Err(source) => {
                let error = CaptureError::Io {
                    artifact: "backup directory".into(),
                    source,
                };
                return self
                    .fail(Phase::Backup, error.into(), RollbackAttempt::NotAttempted)
                    .await;
            }
        };
        let snapshot = match backups.create_backup().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return self
                    .fail(Phase::Backup, e.into(), RollbackAttempt::NotAttempted)
                    .await;
            }
        };

        let executor = StageExecutor::new(
            &self.cluster,
            self.namespace(),
            self.config.readiness.poll_interval,
        );
        let total = self.stages.len();
        for (i, stage) in self.stages.iter().enumerate() {
            let phase = Phase::Deploy {
                stage: stage.name.clone(),
                index: i + 1,
                total,
            };
            self.enter(phase.clone());
            if let Err(e) = executor.run_stage(stage).await {
                return self.fail_and_roll_back(&backups, snapshot.id(), phase, e).await;
            }
        }

        self.enter(Phase::HealthCheck);
        let policy = HealthPolicy::from(&self.config.health);
        let health = match verify_health(&self.probe, &self.config.run.health_url, &policy).await
        {
            Ok(health) => health,
            Err(e) => {
                return self
                    .fail_and_roll_back(&backups, snapshot.id(), Phase::HealthCheck, e.into())
                    .await;
            }
        };

        self.enter(Phase::PostVerify);
        self.post_verify().await;

        self.enter(Phase::Cleanup);
        backups.prune_old_backups(self.config.run.retention_days);
        self.annotate(snapshot.id()).await;

        self.enter(Phase::Succeeded);
        let elapsed = started.elapsed().as_secs();
        info!(
            namespace = self.namespace(),
            snapshot = %snapshot.id(),
            health_attempts = health.attempts,
            elapsed_secs = elapsed,
            "release succeeded"
        );
        let text = format!(
            "{}: release succeeded in {elapsed}s (snapshot {}, healthy after {}/{} checks)",
            self.namespace(),
            snapshot.id(),
            health.attempts,
            health.max_attempts
        );
        deliver_best_effort(&self.notifier, &Notification::success(text)).await;

        RunOutcome::Succeeded {
            snapshot: snapshot.id().clone(),
            health,
        }
    }

    /// Pre-check, then validate every manifest server-side. Nothing persists.
    pub async fn dry_run(&self) -> RunOutcome {
        info!(namespace = self.namespace(), "starting dry run");
        self.enter(Phase::PreCheck);
        if let Err(e) = self.pre_check().await {
            return self.fail(Phase::PreCheck, e, RollbackAttempt::NotAttempted).await;
        }

        let executor = StageExecutor::new(
            &self.cluster,
            self.namespace(),
            self.config.readiness.poll_interval,
        );
        let mut manifests = 0;
        for stage in &self.stages {
            match executor.validate_stage(stage).await {
                Ok(n) => manifests += n,
                Err(e) => {
                    return self
                        .fail(Phase::PreCheck, e, RollbackAttempt::NotAttempted)
                        .await;
                }
            }
        }

        self.enter(Phase::Succeeded);
        info!(namespace = self.namespace(), manifests, "dry run passed");
        RunOutcome::Validated { manifests }
    }

    /// Operator-requested restore of `id`, or the latest snapshot.
    pub async fn rollback(&self, id: Option<&SnapshotId>) -> RunOutcome {
        self.enter(Phase::Rollback);
        let backups = match BackupStore::open_existing(&self.config.run.backup_dir) {
            Ok(store) => self.backups(store),
            Err(e) => {
                let error = RestoreError::NotFound(format!(
                    "backup directory {}: {e}",
                    self.config.run.backup_dir.display()
                ));
                return self
                    .fail(Phase::Rollback, error.into(), RollbackAttempt::NotAttempted)
                    .await;
            }
        };

        let coordinator = RollbackCoordinator::new(&backups, &self.notifier, self.namespace());
        match coordinator.rollback(id).await {
            Ok(report) => {
                self.enter(Phase::Succeeded);
                RunOutcome::RolledBack(report)
            }
            Err(e) => {
                self.fail(Phase::Rollback, e.into(), RollbackAttempt::NotAttempted)
                    .await
            }
        }
    }

    /// Snapshots on disk, oldest first. A missing backup directory has none.
    pub fn list_backups(&self) -> io::Result<Vec<Snapshot>> {
        match BackupStore::open_existing(&self.config.run.backup_dir) {
            Ok(store) => store.list(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn pre_check(&self) -> Result<(), RunError> {
        self.cluster
            .ping()
            .await
            .map_err(|e| RunError::Environment(format!("cluster unreachable: {e}")))?;
        let exists = self
            .cluster
            .namespace_exists(self.namespace())
            .await
            .map_err(|e| RunError::Environment(format!("namespace lookup failed: {e}")))?;
        if !exists {
            return Err(RunError::Environment(format!(
                "namespace {} does not exist",
                self.namespace()
            )));
        }
        debug!(namespace = self.namespace(), "pre-check passed");
        Ok(())
    }

    /// Log a status summary. Informational only; never fails the run.
    async fn post_verify(&self) {
        for kind in STATUS_KINDS {
            match self.cluster.status(self.namespace(), kind).await {
                Ok(table) => {
                    let rows = table
                        .lines()
                        .skip(1)
                        .filter(|line| !line.trim().is_empty())
                        .count();
                    info!(kind, rows, "post-deploy status");
                    debug!(kind, "{table}");
                }
                Err(e) => warn!(kind, error = %e, "post-deploy status unavailable"),
            }
        }
    }

    async fn annotate(&self, id: &SnapshotId) {
        let mut annotations = serde_json::Map::new();
        annotations.insert(SNAPSHOT_ANNOTATION.to_string(), id.as_str().into());
        let partial = serde_json::json!({ "metadata": { "annotations": annotations } });
        let resource = format!("namespace/{}", self.namespace());
        if let Err(e) = self.cluster.patch(self.namespace(), &resource, &partial).await {
            warn!(%resource, error = %e, "failed to record snapshot annotation");
        }
    }

    async fn fail_and_roll_back(
        &self,
        backups: &BackupManager<'_, C>,
        snapshot: &SnapshotId,
        phase: Phase,
        error: RunError,
    ) -> RunOutcome {
        if !error.triggers_rollback() {
            return self.fail(phase, error, RollbackAttempt::NotAttempted).await;
        }
        warn!(%phase, %error, snapshot = %snapshot, "release failed, rolling back");
        self.enter(Phase::Rollback);
        let coordinator = RollbackCoordinator::new(backups, &self.notifier, self.namespace());
        let attempt = match coordinator.rollback(Some(snapshot)).await {
            Ok(report) => RollbackAttempt::Restored(report),
            Err(e) => RollbackAttempt::Failed(e),
        };
        self.fail(phase, error, attempt).await
    }

    async fn fail(&self, phase: Phase, error: RunError, rollback: RollbackAttempt) -> RunOutcome {
        self.enter(Phase::Failed);
        let mut text = format!("{}: {phase} failed: {error}", self.namespace());
        match &rollback {
            RollbackAttempt::NotAttempted => {}
            RollbackAttempt::Restored(report) => {
                text.push_str(&format!("; rolled back to snapshot {}", report.snapshot));
            }
            RollbackAttempt::Failed(e) => text.push_str(&format!("; rollback failed: {e}")),
        }
        error!(%phase, %error, rolled_back = rollback.was_attempted(), "run failed");
        deliver_best_effort(&self.notifier, &Notification::failure(text)).await;
        RunOutcome::Failed {
            phase,
            error,
            rollback,
        }
    }

    async fn interrupted(&self) -> RunOutcome {
        let phase = self.phase();
        self.enter(Phase::Interrupted);
        warn!(%phase, "interrupted, exiting without rollback");
        let text = format!(
            "{}: release interrupted during {phase}; no rollback attempted",
            self.namespace()
        );
        deliver_best_effort(&self.notifier, &Notification::interrupted(text)).await;
        RunOutcome::Interrupted { phase }
    }
}
