//! Poll-with-timeout primitive for multi-minute provider lifecycles.
//!
//! The primitive is separated from the calls that start a lifecycle so it can
//! be driven by a fake [`Clock`] and a scripted status source in tests.

use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use thiserror::Error;

/// Hard ceiling for teardown invocations; app deletion that outlasts it fails
/// the lifecycle event and needs a manual retry.
pub const TEARDOWN_CEILING: Duration = Duration::from_secs(15 * 60);

pub trait Clock {
    /// Time elapsed since the clock was started.
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started_at: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(initial_interval: Duration, max_interval: Duration, timeout: Duration) -> Self {
        Self {
            initial_interval,
            max_interval: max_interval.max(initial_interval),
            timeout,
        }
    }

    /// Shrinks the timeout so polling stops `margin` before `remaining` runs out.
    pub fn bounded_by(self, remaining: Duration, margin: Duration) -> Self {
        Self {
            timeout: self.timeout.min(remaining.saturating_sub(margin)),
            ..self
        }
    }

    pub fn capped_at(self, ceiling: Duration) -> Self {
        Self {
            timeout: self.timeout.min(ceiling),
            ..self
        }
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_interval)
            .with_max_delay(self.max_interval)
            .with_factor(2.0)
            .build()
    }
}

/// One observation of the resource being waited on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    /// Still converging; the string describes what was observed.
    Pending(String),
    /// Terminal state that will never become ready.
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("timed out after {elapsed:?} ({attempts} attempts), last observed: {last_observed}")]
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last_observed: String,
    },
    #[error("reached terminal state: {0}")]
    Terminal(String),
    #[error("status check failed: {0}")]
    Check(E),
}

/// Calls `check` until it reports ready, reports a terminal failure, errors,
/// or the policy timeout elapses. `check` always runs at least once.
pub fn poll_until<T, E, C, F>(
    policy: &PollPolicy,
    clock: &C,
    mut check: F,
) -> Result<T, PollError<E>>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<PollStatus<T>, E>,
{
    let mut delays = policy.delays();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_observed = match check().map_err(PollError::Check)? {
            PollStatus::Ready(value) => return Ok(value),
            PollStatus::Failed(reason) => return Err(PollError::Terminal(reason)),
            PollStatus::Pending(observed) => observed,
        };

        let elapsed = clock.elapsed();
        if elapsed >= policy.timeout {
            return Err(PollError::TimedOut {
                attempts,
                elapsed,
                last_observed,
            });
        }

        let delay = delays
            .next()
            .unwrap_or(policy.max_interval)
            .min(policy.timeout - elapsed);
        clock.sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    #[derive(Default)]
    struct TestClock {
        now: Cell<Duration>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl Clock for TestClock {
        fn elapsed(&self) -> Duration {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
            self.sleeps.borrow_mut().push(duration);
        }
    }

    fn policy(timeout_secs: u64) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
            Duration::from_secs(timeout_secs),
        )
    }

    #[test]
    fn returns_ready_value_without_sleeping() {
        let clock = TestClock::default();
        let result: Result<&str, PollError<String>> =
            poll_until(&policy(60), &clock, || Ok(PollStatus::Ready("d-1")));

        assert_eq!(result, Ok("d-1"));
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn backs_off_until_ready() {
        let clock = TestClock::default();
        let mut remaining_pending = 3;
        let result: Result<(), PollError<String>> = poll_until(&policy(600), &clock, || {
            if remaining_pending == 0 {
                return Ok(PollStatus::Ready(()));
            }
            remaining_pending -= 1;
            Ok(PollStatus::Pending("Pending".to_string()))
        });

        assert_eq!(result, Ok(()));
        let sleeps = clock.sleeps.borrow();
        assert_eq!(sleeps.len(), 3);
        assert_eq!(sleeps[0], Duration::from_secs(5));
        assert!(sleeps[1] > sleeps[0]);
        assert!(sleeps.iter().all(|delay| *delay <= Duration::from_secs(30)));
    }

    #[test]
    fn times_out_with_last_observation() {
        let clock = TestClock::default();
        let result: Result<(), PollError<String>> = poll_until(&policy(60), &clock, || {
            Ok(PollStatus::Pending("Deleting".to_string()))
        });

        let (attempts, elapsed, last_observed) = match result {
            Err(PollError::TimedOut {
                attempts,
                elapsed,
                last_observed,
            }) => (attempts, elapsed, last_observed),
            other => panic!("expected timeout, got {other:?}"),
        };
        assert!(attempts > 1);
        assert_eq!(elapsed, Duration::from_secs(60));
        assert_eq!(last_observed, "Deleting");
    }

    #[test]
    fn never_sleeps_past_the_timeout() {
        let clock = TestClock::default();
        let _: Result<(), PollError<String>> = poll_until(&policy(17), &clock, || {
            Ok(PollStatus::Pending("Pending".to_string()))
        });

        assert_eq!(clock.elapsed(), Duration::from_secs(17));
    }

    #[test]
    fn zero_timeout_still_checks_once() {
        let clock = TestClock::default();
        let mut checks = 0;
        let result: Result<(), PollError<String>> = poll_until(&policy(0), &clock, || {
            checks += 1;
            Ok(PollStatus::Pending("Pending".to_string()))
        });

        assert_eq!(checks, 1);
        assert!(matches!(result, Err(PollError::TimedOut { attempts: 1, .. })));
    }

    #[test]
    fn terminal_failure_stops_immediately() {
        let clock = TestClock::default();
        let result: Result<(), PollError<String>> = poll_until(&policy(600), &clock, || {
            Ok(PollStatus::Failed("Failed: subnet not found".to_string()))
        });

        assert_eq!(
            result,
            Err(PollError::Terminal("Failed: subnet not found".to_string()))
        );
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn check_errors_propagate_unchanged() {
        let clock = TestClock::default();
        let result: Result<(), PollError<&str>> =
            poll_until(&policy(600), &clock, || Err("ThrottlingException"));

        assert_eq!(result, Err(PollError::Check("ThrottlingException")));
    }

    #[test]
    fn bounded_policy_respects_remaining_invocation_time() {
        let bounded = policy(870).bounded_by(Duration::from_secs(300), Duration::from_secs(20));
        assert_eq!(bounded.timeout, Duration::from_secs(280));

        let exhausted = policy(870).bounded_by(Duration::from_secs(10), Duration::from_secs(20));
        assert_eq!(exhausted.timeout, Duration::ZERO);
    }

    #[test]
    fn teardown_ceiling_caps_configured_timeout() {
        let capped = policy(3_600).capped_at(TEARDOWN_CEILING);
        assert_eq!(capped.timeout, Duration::from_secs(900));
    }
}
