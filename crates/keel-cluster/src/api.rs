//! The cluster API seam.

use std::future::Future;
use std::path::Path;

use keel_core::{ReadinessPredicate, ResourceKind};

use crate::error::ClusterResult;

/// How a manifest is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Declarative merge with live state.
    Merge,
    /// Replace live objects that conflict instead of merging into them.
    ForceReplace,
    /// Validate against the API server without persisting anything.
    ServerDryRun,
}

/// Resource operations against the orchestration API.
///
/// Implementations must be safe to call repeatedly with the same input:
/// applying a manifest twice yields the same live state as applying it once.
pub trait ClusterApi: Send + Sync {
    /// Check that the API server answers.
    fn ping(&self) -> impl Future<Output = ClusterResult<()>> + Send;

    fn namespace_exists(&self, namespace: &str) -> impl Future<Output = ClusterResult<bool>> + Send;

    /// Submit a manifest file (or directory of manifests).
    fn apply(&self, manifest: &Path, mode: ApplyMode)
    -> impl Future<Output = ClusterResult<()>> + Send;

    /// Fetch every object of `kind` in `namespace` as a YAML list.
    fn get(
        &self,
        namespace: &str,
        kind: ResourceKind,
    ) -> impl Future<Output = ClusterResult<String>> + Send;

    /// Evaluate a readiness predicate once.
    ///
    /// Holds only when at least one object matches the selector and every
    /// match reports the condition as `True`.
    fn condition_met(
        &self,
        namespace: &str,
        predicate: &ReadinessPredicate,
    ) -> impl Future<Output = ClusterResult<bool>> + Send;

    /// Run a command inside a workload, optionally feeding it `stdin`.
    fn exec(
        &self,
        namespace: &str,
        workload: &str,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> impl Future<Output = ClusterResult<Vec<u8>>> + Send;

    /// Merge-patch a single resource such as `namespace/prod`.
    fn patch(
        &self,
        namespace: &str,
        resource: &str,
        partial: &serde_json::Value,
    ) -> impl Future<Output = ClusterResult<()>> + Send;

    /// Human-readable status table for a resource kind. Read-only.
    fn status(&self, namespace: &str, kind: &str)
    -> impl Future<Output = ClusterResult<String>> + Send;
}
