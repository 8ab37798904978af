//! keel.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{Stage, reference_stages};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeelConfig {
    pub run: RunConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    pub database: Option<DatabaseConfig>,
    /// Ordered stage plan. Empty means the reference plan.
    #[serde(default, rename = "stage")]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub namespace: String,
    pub backup_dir: PathBuf,
    pub health_url: String,
    pub notify_url: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// kubectl binary to invoke.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            context: None,
            kubeconfig: None,
        }
    }
}

/// Acceptance gate settings for the post-deploy health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_interval", with = "serde_duration")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout", with = "serde_duration")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval: default_health_interval(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_interval", with = "serde_duration")]
    pub poll_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

/// The data-tier workload that is dumped before a deploy and restored on rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Workload reference accepted by `kubectl exec`, e.g. `deployment/postgres`.
    pub workload: String,
    pub dump_command: Vec<String>,
    pub restore_command: Vec<String>,
}

fn default_retention_days() -> u32 {
    7
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_max_attempts() -> u32 {
    30
}

fn default_health_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl KeelConfig {
    /// Load a config file. Relative manifest paths resolve against the file's directory.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_manifests(base);
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The stage plan to execute, falling back to the reference plan.
    pub fn stage_plan(&self) -> Vec<Stage> {
        if self.stages.is_empty() {
            reference_stages()
        } else {
            self.stages.clone()
        }
    }

    /// Anchor every relative manifest path at `base`.
    pub fn resolve_manifests(&mut self, base: &Path) {
        if self.stages.is_empty() {
            self.stages = reference_stages();
        }
        for stage in &mut self.stages {
            for manifest in &mut stage.manifests {
                if manifest.is_relative() {
                    *manifest = base.join(&*manifest);
                }
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.run.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("run.namespace must not be empty".into()));
        }
        if self.run.retention_days == 0 {
            return Err(ConfigError::Invalid("run.retention_days must be at least 1".into()));
        }
        if !self.run.health_url.starts_with("http://") {
            return Err(ConfigError::Invalid(format!(
                "run.health_url must be an http:// URL, got {:?}",
                self.run.health_url
            )));
        }
        if self.health.max_attempts == 0 {
            return Err(ConfigError::Invalid("health.max_attempts must be at least 1".into()));
        }
        if let Some(db) = &self.database {
            if db.dump_command.is_empty() || db.restore_command.is_empty() {
                return Err(ConfigError::Invalid(
                    "database.dump_command and database.restore_command must not be empty"
                        .into(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for stage in &self.stage_plan() {
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stage name {:?}",
                    stage.name
                )));
            }
            if stage.manifests.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stage {:?} applies no manifests",
                    stage.name
                )));
            }
        }
        Ok(())
    }
}
