//! Applying one stage and waiting for its readiness gate.

use std::time::Duration;

use keel_cluster::{ApplyMode, ClusterApi};
use keel_core::{ReadinessPredicate, Stage};
use keel_health::{Budget, poll_until};
use tracing::{debug, info};

use crate::error::RunError;

/// What a stage did on its way to ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub applied: usize,
    /// Readiness checks made across all predicates.
    pub checks: u32,
}

/// Applies stages against one namespace.
pub struct StageExecutor<'a, C> {
    cluster: &'a C,
    namespace: &'a str,
    poll_interval: Duration,
}

impl<'a, C: ClusterApi> StageExecutor<'a, C> {
    pub fn new(cluster: &'a C, namespace: &'a str, poll_interval: Duration) -> Self {
        Self {
            cluster,
            namespace,
            poll_interval,
        }
    }

    /// Apply every manifest in order, then wait on each predicate in turn.
    ///
    /// The first rejected manifest stops the stage; later manifests are not
    /// applied.
    pub async fn run_stage(&self, stage: &Stage) -> Result<StageReport, RunError> {
        info!(stage = %stage.name, manifests = stage.manifests.len(), "applying stage");
        for manifest in &stage.manifests {
            self.cluster
                .apply(manifest, ApplyMode::Merge)
                .await
                .map_err(|source| RunError::StageApply {
                    stage: stage.name.clone(),
                    manifest: manifest.clone(),
                    source,
                })?;
            debug!(stage = %stage.name, manifest = %manifest.display(), "applied");
        }

        let mut checks = 0;
        for predicate in &stage.readiness {
            checks += self.wait_ready(&stage.name, predicate).await?;
        }
        if stage.is_gated() {
            info!(stage = %stage.name, checks, "stage ready");
        }

        Ok(StageReport {
            stage: stage.name.clone(),
            applied: stage.manifests.len(),
            checks,
        })
    }

    /// Poll one predicate until it holds or its timeout elapses.
    ///
    /// A failed check is treated as "not ready yet".
    pub async fn wait_ready(
        &self,
        stage: &str,
        predicate: &ReadinessPredicate,
    ) -> Result<u32, RunError> {
        info!(stage, %predicate, timeout = ?predicate.timeout, "waiting for readiness");
        let polled = poll_until(
            self.poll_interval,
            Budget::Timeout(predicate.timeout),
            |attempt| async move {
                match self.cluster.condition_met(self.namespace, predicate).await {
                    Ok(true) => Some(()),
                    Ok(false) => None,
                    Err(e) => {
                        debug!(stage, attempt, error = %e, "readiness check failed");
                        None
                    }
                }
            },
        )
        .await;

        match polled {
            Ok(polled) => Ok(polled.attempts),
            Err(_) => Err(RunError::ReadinessTimeout {
                stage: stage.to_string(),
                predicate: predicate.to_string(),
                timeout: predicate.timeout,
            }),
        }
    }

    /// Server-side validate every manifest of a stage without persisting.
    pub async fn validate_stage(&self, stage: &Stage) -> Result<usize, RunError> {
        for manifest in &stage.manifests {
            self.cluster
                .apply(manifest, ApplyMode::ServerDryRun)
                .await
                .map_err(|source| RunError::Validation {
                    manifest: manifest.clone(),
                    source,
                })?;
            debug!(stage = %stage.name, manifest = %manifest.display(), "validated");
        }
        Ok(stage.manifests.len())
    }
}
