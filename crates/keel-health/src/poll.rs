//! Bounded polling shared by readiness waits and the health gate.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// How long a poll may keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Give up after this many attempts.
    Attempts(u32),
    /// Give up once this much time has passed since the first attempt.
    Timeout(Duration),
}

/// A poll that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
}

/// A poll that ran out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Call `attempt` until it yields `Some`, sleeping `interval` between tries.
///
/// `attempt` receives the 1-based attempt number. There is always at least
/// one attempt, and no sleep follows the final one. Under a timeout budget
/// the last sleep is shortened so the final attempt lands on the deadline,
/// and an attempt still running at the deadline is abandoned.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    budget: Budget,
    mut attempt: F,
) -> Result<Polled<T>, Exhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let deadline = match budget {
        Budget::Timeout(timeout) => Some(started + timeout),
        Budget::Attempts(_) => None,
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, attempt(attempts))
                .await
                .unwrap_or_else(|_| {
                    debug!(attempt = attempts, "poll attempt outlived the deadline");
                    None
                }),
            None => attempt(attempts).await,
        };
        if let Some(value) = result {
            return Ok(Polled { value, attempts });
        }

        let pause = match (budget, deadline) {
            (Budget::Attempts(max), _) => {
                if attempts >= max {
                    None
                } else {
                    Some(interval)
                }
            }
            (Budget::Timeout(_), Some(deadline)) => {
                let now = Instant::now();
                if now >= deadline {
                    None
                } else {
                    Some(interval.min(deadline - now))
                }
            }
            (Budget::Timeout(_), None) => None,
        };

        match pause {
            Some(pause) => {
                debug!(attempt = attempts, ?pause, "poll not satisfied, retrying");
                tokio::time::sleep(pause).await;
            }
            None => {
                return Err(Exhausted {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_success_returns_immediately() {
        let start = Instant::now();
        let polled = poll_until(Duration::from_secs(10), Budget::Attempts(5), |_| async {
            Some("ok")
        })
        .await
        .unwrap();
        assert_eq!(polled, Polled { value: "ok", attempts: 1 });
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_budget_stops_without_trailing_sleep() {
        let start = Instant::now();
        let calls = Cell::new(0);
        let err = poll_until(Duration::from_secs(10), Budget::Attempts(3), |_| {
            calls.set(calls.get() + 1);
            async { None::<()> }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_budget_lands_last_attempt_on_deadline() {
        let start = Instant::now();
        let err = poll_until(
            Duration::from_secs(5),
            Budget::Timeout(Duration::from_secs(12)),
            |_| async { None::<()> },
        )
        .await
        .unwrap_err();

        // Attempts at t=0, 5, 10, 12.
        assert_eq!(err.attempts, 4);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let polled = poll_until(
            Duration::from_secs(5),
            Budget::Timeout(Duration::from_secs(60)),
            |n| async move { (n == 3).then_some(n) },
        )
        .await
        .unwrap();
        assert_eq!(polled.attempts, 3);
        assert_eq!(polled.value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_is_cut_off_at_deadline() {
        let start = Instant::now();
        let err = poll_until(
            Duration::from_secs(5),
            Budget::Timeout(Duration::from_secs(300)),
            |_| std::future::pending::<Option<()>>(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_share_the_deadline() {
        let start = Instant::now();
        let err = poll_until(
            Duration::from_secs(5),
            Budget::Timeout(Duration::from_secs(30)),
            |_| async {
                tokio::time::sleep(Duration::from_secs(20)).await;
                None::<()>
            },
        )
        .await
        .unwrap_err();

        // Attempts at t=0 (ends 20), t=25 (cut off at 30).
        assert_eq!(err.attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempt_budget_still_tries_once() {
        let err = poll_until(Duration::from_secs(1), Budget::Attempts(0), |_| async {
            None::<()>
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
