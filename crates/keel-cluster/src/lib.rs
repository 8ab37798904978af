//! keel-cluster — the cluster client used by every other keel component.
//!
//! All resource operations go through the [`ClusterApi`] trait:
//!
//! ```text
//! ClusterApi
//!   ├── Kubectl         shells out to kubectl (production)
//!   └── InMemoryCluster records calls, injects failures (tests, rehearsals)
//! ```
//!
//! The client is deliberately thin. It does not retry and it does not
//! poll; readiness waits and retries live with the callers.

pub mod api;
pub mod error;
pub mod kubectl;
pub mod memory;

pub use api::{ApplyMode, ClusterApi};
pub use error::{ClusterError, ClusterResult};
pub use kubectl::Kubectl;
pub use memory::{ClusterCall, InMemoryCluster};
