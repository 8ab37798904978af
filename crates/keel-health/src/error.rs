//! Error types for the health verifier.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("health check exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
}
