//! In-memory `ClusterApi` that records every call.
//!
//! Used by tests across the workspace in place of a live cluster. Failures
//! are injected up front with the builder methods; live state is a map from
//! manifest path to its last applied content, so re-applying a manifest
//! converges instead of duplicating.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use keel_core::{ReadinessPredicate, ResourceKind};

use crate::api::{ApplyMode, ClusterApi};
use crate::error::{ClusterError, ClusterResult};

/// One recorded cluster operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    Ping,
    NamespaceExists(String),
    Apply { manifest: PathBuf, mode: ApplyMode },
    Get { namespace: String, kind: ResourceKind },
    ConditionMet { selector: String },
    Exec { workload: String, command: Vec<String>, stdin: Option<Vec<u8>> },
    Patch { resource: String, partial: serde_json::Value },
    Status { kind: String },
}

#[derive(Debug, Default)]
struct Inner {
    unreachable: bool,
    namespaces: HashSet<String>,
    live: BTreeMap<PathBuf, String>,
    calls: Vec<ClusterCall>,
    rejected: HashSet<PathBuf>,
    never_ready: HashSet<String>,
    hanging: HashSet<String>,
    /// Remaining failed checks before a selector reports ready.
    ready_after: HashMap<String, u32>,
    resources: HashMap<ResourceKind, String>,
    failing_gets: HashSet<ResourceKind>,
    failing_exec: bool,
    failing_restore: bool,
    failing_status: bool,
    dump: Vec<u8>,
}

/// A recording, failure-injectable cluster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: ClusterCall) {
        self.lock().calls.push(call);
    }

    // ── Builders ───────────────────────────────────────────────────

    pub fn with_namespace(self, namespace: &str) -> Self {
        self.lock().namespaces.insert(namespace.to_string());
        self
    }

    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// The API rejects this manifest on every apply.
    pub fn reject_manifest(self, manifest: impl Into<PathBuf>) -> Self {
        self.lock().rejected.insert(manifest.into());
        self
    }

    /// Objects behind this selector never report ready.
    pub fn never_ready(self, selector: &str) -> Self {
        self.lock().never_ready.insert(selector.to_string());
        self
    }

    /// Checks against this selector never return.
    pub fn hanging(self, selector: &str) -> Self {
        self.lock().hanging.insert(selector.to_string());
        self
    }

    /// Objects behind this selector report ready after `checks` failed checks.
    pub fn ready_after(self, selector: &str, checks: u32) -> Self {
        self.lock().ready_after.insert(selector.to_string(), checks);
        self
    }

    /// What `get` returns for a resource kind.
    pub fn with_resource(self, kind: ResourceKind, yaml: &str) -> Self {
        self.lock().resources.insert(kind, yaml.to_string());
        self
    }

    pub fn failing_get(self, kind: ResourceKind) -> Self {
        self.lock().failing_gets.insert(kind);
        self
    }

    pub fn failing_exec(self) -> Self {
        self.lock().failing_exec = true;
        self
    }

    /// Execs fed stdin fail; dumps still work.
    pub fn failing_restore(self) -> Self {
        self.lock().failing_restore = true;
        self
    }

    pub fn failing_status(self) -> Self {
        self.lock().failing_status = true;
        self
    }

    /// Output of any exec that is not fed stdin (i.e. a database dump).
    pub fn with_dump(self, dump: &[u8]) -> Self {
        self.lock().dump = dump.to_vec();
        self
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.lock().calls.clone()
    }

    /// Manifests applied in the given mode, in order.
    pub fn applied(&self, mode: ApplyMode) -> Vec<PathBuf> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::Apply { manifest, mode: m } if *m == mode => Some(manifest.clone()),
                _ => None,
            })
            .collect()
    }

    /// Live state: manifest path to last applied content.
    pub fn live(&self) -> BTreeMap<PathBuf, String> {
        self.lock().live.clone()
    }

    /// Every payload that was piped into an exec.
    pub fn piped_inputs(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::Exec { stdin: Some(input), .. } => Some(input.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn patches(&self) -> Vec<(String, serde_json::Value)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::Patch { resource, partial } => Some((resource.clone(), partial.clone())),
                _ => None,
            })
            .collect()
    }
}

impl ClusterApi for InMemoryCluster {
    async fn ping(&self) -> ClusterResult<()> {
        self.record(ClusterCall::Ping);
        if self.lock().unreachable {
            return Err(ClusterError::Unreachable("in-memory cluster is offline".into()));
        }
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> ClusterResult<bool> {
        self.record(ClusterCall::NamespaceExists(namespace.to_string()));
        Ok(self.lock().namespaces.contains(namespace))
    }

    async fn apply(&self, manifest: &Path, mode: ApplyMode) -> ClusterResult<()> {
        self.record(ClusterCall::Apply {
            manifest: manifest.to_path_buf(),
            mode,
        });
        let mut inner = self.lock();
        if inner.rejected.contains(manifest) {
            return Err(ClusterError::Command {
                command: format!("apply -f {}", manifest.display()),
                status: Some(1),
                stderr: "admission webhook denied the request".into(),
            });
        }
        if mode != ApplyMode::ServerDryRun {
            let content = std::fs::read_to_string(manifest).unwrap_or_default();
            inner.live.insert(manifest.to_path_buf(), content);
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, kind: ResourceKind) -> ClusterResult<String> {
        self.record(ClusterCall::Get {
            namespace: namespace.to_string(),
            kind,
        });
        let inner = self.lock();
        if inner.failing_gets.contains(&kind) {
            return Err(ClusterError::Command {
                command: format!("get {kind} -n {namespace}"),
                status: Some(1),
                stderr: "forbidden".into(),
            });
        }
        Ok(inner
            .resources
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| "apiVersion: v1\nkind: List\nitems: []\n".to_string()))
    }

    async fn condition_met(
        &self,
        _namespace: &str,
        predicate: &ReadinessPredicate,
    ) -> ClusterResult<bool> {
        self.record(ClusterCall::ConditionMet {
            selector: predicate.selector.clone(),
        });
        let hangs = self.lock().hanging.contains(&predicate.selector);
        if hangs {
            std::future::pending::<()>().await;
        }
        let mut inner = self.lock();
        if inner.never_ready.contains(&predicate.selector) {
            return Ok(false);
        }
        match inner.ready_after.get_mut(&predicate.selector) {
            Some(0) | None => Ok(true),
            Some(remaining) => {
                *remaining -= 1;
                Ok(false)
            }
        }
    }

    async fn exec(
        &self,
        _namespace: &str,
        workload: &str,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> ClusterResult<Vec<u8>> {
        self.record(ClusterCall::Exec {
            workload: workload.to_string(),
            command: command.to_vec(),
            stdin: stdin.map(<[u8]>::to_vec),
        });
        let inner = self.lock();
        if inner.failing_exec || (inner.failing_restore && stdin.is_some()) {
            return Err(ClusterError::Command {
                command: format!("exec {workload}"),
                status: Some(137),
                stderr: "container not running".into(),
            });
        }
        if stdin.is_some() {
            Ok(Vec::new())
        } else {
            Ok(inner.dump.clone())
        }
    }

    async fn patch(
        &self,
        _namespace: &str,
        resource: &str,
        partial: &serde_json::Value,
    ) -> ClusterResult<()> {
        self.record(ClusterCall::Patch {
            resource: resource.to_string(),
            partial: partial.clone(),
        });
        Ok(())
    }

    async fn status(&self, _namespace: &str, kind: &str) -> ClusterResult<String> {
        self.record(ClusterCall::Status {
            kind: kind.to_string(),
        });
        if self.lock().failing_status {
            return Err(ClusterError::Unreachable("status unavailable".into()));
        }
        Ok(format!("NAME\n{kind}-0\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn reapplying_a_manifest_converges() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("backend.yaml");
        std::fs::write(&manifest, "kind: Deployment\nmetadata:\n  name: backend\n").unwrap();

        let cluster = InMemoryCluster::new();
        cluster.apply(&manifest, ApplyMode::Merge).await.unwrap();
        let once = cluster.live();
        cluster.apply(&manifest, ApplyMode::Merge).await.unwrap();
        let twice = cluster.live();

        assert_eq!(twice.len(), 1);
        assert_eq!(once, twice);
        assert_eq!(cluster.applied(ApplyMode::Merge).len(), 2);
    }

    #[tokio::test]
    async fn dry_run_leaves_live_state_untouched() {
        let cluster = InMemoryCluster::new();
        cluster
            .apply(Path::new("k8s/redis.yaml"), ApplyMode::ServerDryRun)
            .await
            .unwrap();
        assert!(cluster.live().is_empty());
    }

    #[tokio::test]
    async fn rejected_manifest_fails() {
        let cluster = InMemoryCluster::new().reject_manifest("k8s/bad.yaml");
        let err = cluster
            .apply(Path::new("k8s/bad.yaml"), ApplyMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Command { .. }));
    }

    #[tokio::test]
    async fn ready_after_counts_down() {
        let cluster = InMemoryCluster::new().ready_after("app=redis", 2);
        let predicate =
            ReadinessPredicate::new("pod", "app=redis", "Ready", Duration::from_secs(30));

        assert!(!cluster.condition_met("prod", &predicate).await.unwrap());
        assert!(!cluster.condition_met("prod", &predicate).await.unwrap());
        assert!(cluster.condition_met("prod", &predicate).await.unwrap());
    }

    #[tokio::test]
    async fn exec_returns_dump_and_records_stdin() {
        let cluster = InMemoryCluster::new().with_dump(b"-- dump");
        let cmd = vec!["pg_dump".to_string()];
        let out = cluster.exec("prod", "deployment/postgres", &cmd, None).await.unwrap();
        assert_eq!(out, b"-- dump");

        cluster
            .exec("prod", "deployment/postgres", &cmd, Some(b"restore me"))
            .await
            .unwrap();
        assert_eq!(cluster.piped_inputs(), vec![b"restore me".to_vec()]);
    }

    #[tokio::test]
    async fn failing_restore_spares_dumps() {
        let cluster = InMemoryCluster::new().with_dump(b"-- dump").failing_restore();
        let cmd = vec!["psql".to_string()];
        assert!(cluster.exec("prod", "deployment/postgres", &cmd, None).await.is_ok());
        assert!(cluster
            .exec("prod", "deployment/postgres", &cmd, Some(b"-- dump"))
            .await
            .is_err());
    }
}
