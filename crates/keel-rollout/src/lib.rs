//! keel release orchestration — staged rollout, health gate, and rollback.
//!
//! A run snapshots the target namespace, applies stages in order while
//! waiting on each stage's readiness gate, then holds the release to a
//! health check. Failures after the snapshot restore it.
//!
//! # Components
//!
//! - **`stage`** — apply one stage and wait for readiness
//! - **`rollback`** — restore a snapshot and announce it
//! - **`orchestrator`** — the release state machine
//! - **`phase`** — phases and terminal outcomes

pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod rollback;
pub mod stage;

pub use error::RunError;
pub use orchestrator::{Mode, Orchestrator, SNAPSHOT_ANNOTATION};
pub use phase::{Phase, RollbackAttempt, RunOutcome};
pub use rollback::RollbackCoordinator;
pub use stage::{StageExecutor, StageReport};
