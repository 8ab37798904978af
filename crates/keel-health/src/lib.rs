//! keel-health — the release acceptance gate.
//!
//! Provides a single bounded-retry primitive ([`poll_until`]) and the
//! health verifier built on it. A deployed topology is never considered
//! successful until [`verify_health`] passes, regardless of how its
//! individual readiness waits went.
//!
//! # Architecture
//!
//! ```text
//! verify_health(probe, url, policy)
//!   └── poll_until(interval, Budget::Attempts(n), ..)
//!         └── Probe::probe(url) → ProbeResult
//!               └── http_probe() (hyper, HTTP/1.1)
//! ```
//!
//! Polling sleeps on tokio's clock, so tests run it under a paused clock.

pub mod error;
pub mod poll;
pub mod probe;
pub mod verify;

pub use error::HealthError;
pub use poll::{Budget, Exhausted, Polled, poll_until};
pub use probe::{HttpProbe, Probe, ProbeResult, http_probe};
pub use verify::{HealthCheckResult, HealthOutcome, HealthPolicy, check_health, verify_health};
