//! The post-deploy acceptance gate.

use std::time::Duration;

use keel_core::HealthConfig;
use tracing::{info, warn};

use crate::error::HealthError;
use crate::poll::{Budget, poll_until};
use crate::probe::Probe;

/// Retry budget for the health gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(10),
        }
    }
}

impl From<&HealthConfig> for HealthPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: config.interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    Exhausted,
}

/// What one run of the health gate observed. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub attempts: u32,
    pub max_attempts: u32,
    pub outcome: HealthOutcome,
}

impl HealthCheckResult {
    pub fn into_result(self) -> Result<Self, HealthError> {
        match self.outcome {
            HealthOutcome::Healthy => Ok(self),
            HealthOutcome::Exhausted => Err(HealthError::Exhausted {
                attempts: self.attempts,
            }),
        }
    }
}

/// Probe `url` until it answers healthy or the attempt budget runs out.
pub async fn check_health<P: Probe>(probe: &P, url: &str, policy: &HealthPolicy) -> HealthCheckResult {
    let max_attempts = policy.max_attempts.max(1);
    info!(%url, max_attempts, interval = ?policy.interval, "verifying health");

    let polled = poll_until(policy.interval, Budget::Attempts(max_attempts), |attempt| async move {
        let result = probe.probe(url).await;
        if result.is_healthy() {
            Some(())
        } else {
            warn!(%url, attempt, max_attempts, ?result, "health check failed");
            None
        }
    })
    .await;

    match polled {
        Ok(polled) => {
            info!(%url, attempts = polled.attempts, "health check passed");
            HealthCheckResult {
                attempts: polled.attempts,
                max_attempts,
                outcome: HealthOutcome::Healthy,
            }
        }
        Err(exhausted) => HealthCheckResult {
            attempts: exhausted.attempts,
            max_attempts,
            outcome: HealthOutcome::Exhausted,
        },
    }
}

/// Like [`check_health`], but exhaustion is an error.
pub async fn verify_health<P: Probe>(
    probe: &P,
    url: &str,
    policy: &HealthPolicy,
) -> Result<HealthCheckResult, HealthError> {
    check_health(probe, url, policy).await.into_result()
}
