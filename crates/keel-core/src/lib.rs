//! keel-core — shared types and `keel.toml` parsing for the keel release orchestrator.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{
    ClusterConfig, DatabaseConfig, HealthConfig, KeelConfig, ReadinessConfig, RunConfig,
};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
