//! Generic bounded-restart supervisor.
//!
//! The teacher codebase has no generic supervisor of its own; this is
//! synthesized from the bounded-restart *policy* its acceptor/server loop
//! already follows informally, made explicit and reusable across both
//! binaries' permanent children (acceptor, encapsulator, receiver,
//! decapsulator pool, heartbeat tasks) using the same `tokio::spawn` task
//! idiom the rest of this workspace uses.

use std::{collections::VecDeque, future::Future, time::Duration};

use tracing::{error, warn};

use crate::env::Environment;

/// Restart policy: at most `max_restarts` restarts within any sliding
/// `window`. Exceeding the budget is treated as a fatal, unsupervised
/// failure — the caller should propagate it up to process exit.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Maximum restarts allowed within `window`.
    pub max_restarts: u32,
    /// Sliding window over which `max_restarts` is counted.
    pub window: Duration,
}

impl Default for RestartPolicy {
    /// `max_restarts = 50`, `window = 10s`: the top-level restart budget
    /// every supervised component runs under.
    fn default() -> Self {
        Self { max_restarts: 50, window: Duration::from_secs(10) }
    }
}

/// Raised when a supervised task exceeds its restart budget.
#[derive(Debug, thiserror::Error)]
#[error("component {name} exceeded {max_restarts} restarts within {window:?}")]
pub struct RestartsExhausted {
    /// Name of the supervised component, for logging.
    pub name: String,
    /// The configured restart cap.
    pub max_restarts: u32,
    /// The configured sliding window.
    pub window: Duration,
}

/// Supervises a permanently-restarted task.
///
/// `make_task` is called once per (re)start and must return a fresh future
/// each time — the supervisor cannot resume a future that already
/// completed. `name` identifies the component in restart logs.
///
/// Runs until `make_task`'s future resolves to `Ok(())` (a clean, requested
/// stop) or the restart budget in `policy` is exhausted.
pub async fn supervise<E, F, Fut>(
    env: &E,
    name: &str,
    policy: RestartPolicy,
    mut make_task: F,
) -> Result<(), RestartsExhausted>
where
    E: Environment,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut restarts_in_window: VecDeque<E::Instant> = VecDeque::new();

    loop {
        match make_task().await {
            Ok(()) => return Ok(()),
            Err(reason) => {
                let now = env.now();
                restarts_in_window.push_back(now);
                while let Some(&oldest) = restarts_in_window.front() {
                    if now - oldest > policy.window {
                        restarts_in_window.pop_front();
                    } else {
                        break;
                    }
                }

                if restarts_in_window.len() as u32 > policy.max_restarts {
                    error!(component = name, %reason, "restart budget exhausted");
                    return Err(RestartsExhausted {
                        name: name.to_string(),
                        max_restarts: policy.max_restarts,
                        window: policy.window,
                    });
                }

                warn!(
                    component = name,
                    %reason,
                    restarts_in_window = restarts_in_window.len(),
                    "component crashed, restarting"
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Clone)]
    struct FakeEnv {
        millis: Arc<AtomicU64>,
    }

    impl Environment for FakeEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }

        async fn sleep(&self, _duration: Duration) {}

        fn wall_clock_millis(&self) -> u64 {
            self.millis.load(Ordering::SeqCst)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    #[tokio::test]
    async fn succeeds_without_restarting_on_a_clean_stop() {
        let env = FakeEnv { millis: Arc::new(AtomicU64::new(0)) };
        let calls = Arc::new(AtomicU32::new(0));
        let result = supervise(&env, "test", RestartPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restarts_until_budget_exhausted() {
        let env = FakeEnv { millis: Arc::new(AtomicU64::new(0)) };
        let policy = RestartPolicy { max_restarts: 3, window: Duration::from_secs(10) };
        let calls = Arc::new(AtomicU32::new(0));

        let result = supervise(&env, "flaky", policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom".to_string()) }
        })
        .await;

        assert!(result.is_err());
        // 1 initial failure + 3 allowed restarts = 4 calls before giving up.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn old_restarts_age_out_of_the_window() {
        let millis = Arc::new(AtomicU64::new(0));
        let env = FakeEnv { millis: millis.clone() };
        let policy = RestartPolicy { max_restarts: 1, window: Duration::from_secs(1) };
        let calls = Arc::new(AtomicU32::new(0));

        // Two failures, a second apart, should never trip the 1-per-second
        // budget because the first ages out before the second is counted.
        let millis_for_task = millis.clone();
        let calls_for_task = calls.clone();
        tokio::time::timeout(
            Duration::from_secs(1),
            supervise(&env, "slow-flaky", policy, move || {
                let n = calls_for_task.fetch_add(1, Ordering::SeqCst);
                millis_for_task.store((n as u64 + 1) * 1500, Ordering::SeqCst);
                async move {
                    if n >= 2 {
                        Ok(())
                    } else {
                        Err("boom".to_string())
                    }
                }
            }),
        )
        .await
        .expect("supervise should not hang")
        .expect("restart budget should never be exhausted");
    }
}
