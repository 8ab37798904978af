//! Shared types used across keel crates.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;

/// Resource kinds captured into every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Deployments,
    Services,
    #[serde(rename = "configmaps")]
    ConfigMaps,
    Secrets,
}

impl ResourceKind {
    /// Order in which a snapshot captures resources.
    pub const CAPTURE_ORDER: [ResourceKind; 4] = [
        ResourceKind::Deployments,
        ResourceKind::Services,
        ResourceKind::ConfigMaps,
        ResourceKind::Secrets,
    ];

    /// Order in which a restore re-applies them: referenced objects before
    /// the workloads that mount them.
    pub const RESTORE_ORDER: [ResourceKind; 4] = [
        ResourceKind::Secrets,
        ResourceKind::ConfigMaps,
        ResourceKind::Services,
        ResourceKind::Deployments,
    ];

    /// Resource name as the cluster API spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployments => "deployments",
            ResourceKind::Services => "services",
            ResourceKind::ConfigMaps => "configmaps",
            ResourceKind::Secrets => "secrets",
        }
    }

    /// File name inside a snapshot directory.
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.as_str())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A condition over a label selector that must hold before the next stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessPredicate {
    /// Resource kind, e.g. `pod` or `deployment`.
    pub kind: String,
    /// Label selector, e.g. `app=postgres`.
    pub selector: String,
    /// Condition type that must be `True` on every matching resource.
    pub condition: String,
    /// How long to wait before giving up.
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
}

impl ReadinessPredicate {
    pub fn new(kind: &str, selector: &str, condition: &str, timeout: Duration) -> Self {
        Self {
            kind: kind.to_string(),
            selector: selector.to_string(),
            condition: condition.to_string(),
            timeout,
        }
    }
}

impl fmt::Display for ReadinessPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -l {} condition={}", self.kind, self.selector, self.condition)
    }
}

/// One ordered unit of manifest application plus optional readiness gating.
///
/// An empty `readiness` list makes the stage fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub manifests: Vec<PathBuf>,
    #[serde(default)]
    pub readiness: Vec<ReadinessPredicate>,
}

impl Stage {
    pub fn new(name: &str, manifests: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            manifests: manifests.iter().map(PathBuf::from).collect(),
            readiness: Vec::new(),
        }
    }

    /// Add a readiness gate to the stage.
    pub fn ready_when(mut self, predicate: ReadinessPredicate) -> Self {
        self.readiness.push(predicate);
        self
    }

    pub fn is_gated(&self) -> bool {
        !self.readiness.is_empty()
    }
}

/// The stage plan used when `keel.toml` declares no `[[stage]]` tables.
///
/// Data and cache tiers gate the compute tiers; edge resources go last.
pub fn reference_stages() -> Vec<Stage> {
    vec![
        Stage::new(
            "namespace",
            &["k8s/namespace.yaml", "k8s/network-policies.yaml"],
        ),
        Stage::new("config", &["k8s/secrets.yaml", "k8s/configmap.yaml"]),
        Stage::new("data-tier", &["k8s/postgres.yaml"]).ready_when(ReadinessPredicate::new(
            "pod",
            "app=postgres",
            "Ready",
            Duration::from_secs(300),
        )),
        Stage::new("cache-tier", &["k8s/redis.yaml"]).ready_when(ReadinessPredicate::new(
            "pod",
            "app=redis",
            "Ready",
            Duration::from_secs(300),
        )),
        Stage::new("compute", &["k8s/backend.yaml", "k8s/frontend.yaml"])
            .ready_when(ReadinessPredicate::new(
                "deployment",
                "app=backend",
                "Available",
                Duration::from_secs(600),
            ))
            .ready_when(ReadinessPredicate::new(
                "deployment",
                "app=frontend",
                "Available",
                Duration::from_secs(600),
            )),
        Stage::new("edge", &["k8s/ingress.yaml", "k8s/hpa.yaml"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_and_restore_cover_same_kinds() {
        let mut capture = ResourceKind::CAPTURE_ORDER.to_vec();
        let mut restore = ResourceKind::RESTORE_ORDER.to_vec();
        capture.sort_by_key(|k| k.as_str());
        restore.sort_by_key(|k| k.as_str());
        assert_eq!(capture, restore);
    }

    #[test]
    fn reference_plan_gates_compute_on_data_and_cache() {
        let stages = reference_stages();
        assert_eq!(stages.len(), 6);

        let pos = |name: &str| stages.iter().position(|s| s.name == name).unwrap();
        assert!(pos("data-tier") < pos("compute"));
        assert!(pos("cache-tier") < pos("compute"));
        assert!(pos("compute") < pos("edge"));

        assert!(stages[pos("data-tier")].is_gated());
        assert!(stages[pos("cache-tier")].is_gated());
        assert!(!stages[pos("edge")].is_gated());

        let compute = &stages[pos("compute")];
        assert_eq!(compute.readiness.len(), 2);
        assert!(compute
            .readiness
            .iter()
            .all(|r| r.timeout == Duration::from_secs(600)));
    }

    #[test]
    fn predicate_reads_from_toml() {
        let p: ReadinessPredicate = toml::from_str(
            r#"
kind = "pod"
selector = "app=postgres"
condition = "Ready"
timeout = "300s"
"#,
        )
        .unwrap();
        assert_eq!(p.timeout, Duration::from_secs(300));
        assert_eq!(p.to_string(), "pod -l app=postgres condition=Ready");
    }
}
