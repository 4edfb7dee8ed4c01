//! Bounded exponential backoff for calls against networked dependencies.
//!
//! A [`BackoffPolicy`] computes the wait before each retry from the attempt number alone, so
//! one policy can be shared by any number of independent operations. The retry loops
//! ([`BackoffPolicy::retry_with_backoff`] and [`BackoffPolicy::retry_if`]) give up after
//! [`BackoffConfig::max_attempts`] and hand the final failure back to the caller.
//!
//! Every retry, give-up and success is reported to a [`RetryObserver`]. Observers only watch;
//! they cannot change whether or when an operation is retried.
#![warn(missing_docs)]

use std::{
    fmt::Debug,
    future::Future,
    num::NonZeroUsize,
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};

use rand::Rng;
use tracing::{debug, warn};

/// Randomisation applied to each computed wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Wait a uniformly random duration between zero and the computed interval
    #[default]
    Full,

    /// Wait exactly the computed interval
    None,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Interval before the first retry
    pub init_backoff: Duration,

    /// Upper bound for any single interval
    pub max_backoff: Duration,

    /// Multiplier applied to the interval after every failed attempt
    pub base: f64,

    /// Total number of attempts, including the first one
    pub max_attempts: NonZeroUsize,

    /// Randomisation applied to each interval
    pub jitter: Jitter,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.,
            max_attempts: NonZeroUsize::MIN.saturating_add(4),
            jitter: Jitter::Full,
        }
    }
}

/// Receives notifications from the retry loops of a [`BackoffPolicy`]
pub trait RetryObserver: Debug + Send + Sync {
    /// Called before sleeping `wait` ahead of the next attempt of `task_name`;
    /// `attempt` is the number of attempts made so far.
    fn on_retry(&self, wait: Duration, attempt: usize, task_name: &str);

    /// Called once when `task_name` failed `attempts` times and the budget is exhausted
    fn on_give_up(&self, attempts: usize, task_name: &str);

    /// Called when `task_name` stopped retrying after `attempts` attempts, whatever the outcome
    fn on_finish(&self, attempts: usize, task_name: &str);
}

/// [`RetryObserver`] that writes every notification to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RetryObserver for LogObserver {
    fn on_retry(&self, wait: Duration, attempt: usize, task_name: &str) {
        debug!(
            task_name,
            attempt,
            wait_ms = wait.as_millis() as u64,
            "backing off before calling again"
        );
    }

    fn on_give_up(&self, attempts: usize, task_name: &str) {
        warn!(task_name, attempts, "giving up after exhausting retry budget");
    }

    fn on_finish(&self, attempts: usize, task_name: &str) {
        debug!(task_name, attempts, "finished");
    }
}

/// Bounded exponential backoff with jitter
///
/// The policy holds no per-operation state: the attempt number is passed to
/// [`Self::next_wait`], and every retry loop counts its own attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    observer: Arc<dyn RetryObserver>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl BackoffPolicy {
    /// Create a policy reporting to a [`LogObserver`]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            observer: Arc::new(LogObserver),
        }
    }

    /// Report retry notifications to `observer` instead of the log
    pub fn with_observer(self, observer: Arc<dyn RetryObserver>) -> Self {
        Self { observer, ..self }
    }

    /// The parameters of this policy
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Wait before the attempt following `attempt` failed attempts
    ///
    /// Returns `None` once `attempt` reaches the attempt budget.
    pub fn next_wait(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.config.max_attempts.get() {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let max_secs = self.config.max_backoff.as_secs_f64();
        let interval = self.config.init_backoff.as_secs_f64() * self.config.base.powi(exponent);
        let interval = if interval.is_finite() {
            interval.min(max_secs)
        } else {
            max_secs
        };

        let wait = match self.config.jitter {
            Jitter::None => interval,
            Jitter::Full => rand::thread_rng().gen_range(0.0..=interval),
        };
        Some(Duration::from_secs_f64(wait))
    }

    /// Perform an async operation until it breaks or the attempt budget runs out
    ///
    /// `do_stuff` returns [`ControlFlow::Break`] with the final value, or
    /// [`ControlFlow::Continue`] with the reason to try again. When the budget is exhausted the
    /// last `Continue` value is returned as the error.
    pub async fn retry_with_backoff<F, F1, B, E>(
        &self,
        task_name: &str,
        mut do_stuff: F,
    ) -> Result<B, E>
    where
        F: FnMut() -> F1,
        F1: Future<Output = ControlFlow<B, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let e = match do_stuff().await {
                ControlFlow::Break(r) => {
                    self.observer.on_finish(attempt, task_name);
                    return Ok(r);
                }
                ControlFlow::Continue(e) => e,
            };

            match self.next_wait(attempt) {
                Some(wait) => {
                    self.observer.on_retry(wait, attempt, task_name);
                    tokio::time::sleep(wait).await;
                }
                None => {
                    self.observer.on_give_up(attempt, task_name);
                    return Err(e);
                }
            }
        }
    }

    /// Retry a fallible async operation while `is_retryable` holds for its error
    ///
    /// Errors that are not retryable are returned after the first attempt.
    pub async fn retry_if<F, F1, T, E, C>(
        &self,
        task_name: &str,
        is_retryable: C,
        mut do_stuff: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> F1,
        F1: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let is_retryable = &is_retryable;
        let do_stuff = &mut do_stuff;
        self.retry_with_backoff(task_name, move || {
            let fut = do_stuff();
            async move {
                match fut.await {
                    Ok(v) => ControlFlow::Break(Ok(v)),
                    Err(e) if is_retryable(&e) => ControlFlow::Continue(e),
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            }
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use refresh_test_helpers::{assert_contains, assert_not_contains, tracing::TracingCapture};

    #[derive(Debug, Clone, PartialEq)]
    enum Notification {
        Retry { wait: Duration, attempt: usize },
        GiveUp { attempts: usize },
        Finish { attempts: usize },
    }

    #[derive(Debug, Default)]
    struct RecordingObserver {
        notifications: Mutex<Vec<(String, Notification)>>,
    }

    impl RecordingObserver {
        fn notifications(&self) -> Vec<Notification> {
            self.notifications
                .lock()
                .iter()
                .map(|(_, n)| n.clone())
                .collect()
        }
    }

    impl RetryObserver for RecordingObserver {
        fn on_retry(&self, wait: Duration, attempt: usize, task_name: &str) {
            self.notifications
                .lock()
                .push((task_name.into(), Notification::Retry { wait, attempt }));
        }

        fn on_give_up(&self, attempts: usize, task_name: &str) {
            self.notifications
                .lock()
                .push((task_name.into(), Notification::GiveUp { attempts }));
        }

        fn on_finish(&self, attempts: usize, task_name: &str) {
            self.notifications
                .lock()
                .push((task_name.into(), Notification::Finish { attempts }));
        }
    }

    fn config(max_attempts: usize) -> BackoffConfig {
        BackoffConfig {
            init_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            base: 2.,
            max_attempts: NonZeroUsize::new(max_attempts).unwrap(),
            jitter: Jitter::None,
        }
    }

    fn recording_policy(max_attempts: usize) -> (BackoffPolicy, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let policy = BackoffPolicy::new(config(max_attempts))
            .with_observer(Arc::clone(&observer) as Arc<dyn RetryObserver>);
        (policy, observer)
    }

    #[test_log::test]
    fn next_wait_grows_and_caps() {
        let policy = BackoffPolicy::new(config(6));

        let waits: Vec<_> = (1..=6).map(|attempt| policy.next_wait(attempt)).collect();
        assert_eq!(
            waits,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(5)),
                Some(Duration::from_secs(5)),
                None,
            ]
        );
    }

    #[test]
    fn next_wait_is_stateless() {
        let policy = BackoffPolicy::new(config(10));
        assert_eq!(policy.next_wait(3), policy.next_wait(3));
        assert_eq!(policy.next_wait(2), Some(Duration::from_secs(2)));
    }

    #[test]
    fn next_wait_huge_attempt_is_capped() {
        let policy = BackoffPolicy::new(config(usize::MAX));
        assert_eq!(policy.next_wait(100_000), Some(Duration::from_secs(5)));
    }

    #[test]
    fn full_jitter_within_bounds() {
        let policy = BackoffPolicy::new(BackoffConfig {
            jitter: Jitter::Full,
            ..config(10)
        });

        for attempt in 1..10 {
            let wait = policy.next_wait(attempt).unwrap();
            assert!(wait <= Duration::from_secs(5), "{wait:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let (policy, observer) = recording_policy(5);

        let mut calls = 0;
        let r: Result<u32, &str> = policy
            .retry_with_backoff("flaky", || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        ControlFlow::Continue("not yet")
                    } else {
                        ControlFlow::Break(42)
                    }
                }
            })
            .await;

        assert_eq!(r, Ok(42));
        assert_eq!(calls, 3);
        assert_eq!(
            observer.notifications(),
            vec![
                Notification::Retry {
                    wait: Duration::from_secs(1),
                    attempt: 1
                },
                Notification::Retry {
                    wait: Duration::from_secs(2),
                    attempt: 2
                },
                Notification::Finish { attempts: 3 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_last_error() {
        let (policy, observer) = recording_policy(3);

        let mut calls = 0;
        let r: Result<(), String> = policy
            .retry_with_backoff("always failing", || {
                calls += 1;
                let n = calls;
                async move { ControlFlow::Continue(format!("failure {n}")) }
            })
            .await;

        assert_eq!(r, Err("failure 3".to_string()));
        assert_eq!(calls, 3);

        let notifications = observer.notifications();
        assert_eq!(notifications.len(), 3);
        assert_eq!(
            notifications.last(),
            Some(&Notification::GiveUp { attempts: 3 })
        );
        let names: Vec<_> = observer
            .notifications
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        assert!(names.iter().all(|n| n == "always failing"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_if_stops_on_non_retryable() {
        let (policy, observer) = recording_policy(5);

        let mut calls = 0;
        let r: Result<(), &str> = policy
            .retry_if(
                "fatal",
                |e: &&str| *e == "transient",
                || {
                    calls += 1;
                    async { Err("fatal") }
                },
            )
            .await;

        assert_eq!(r, Err("fatal"));
        assert_eq!(calls, 1);
        assert_eq!(
            observer.notifications(),
            vec![Notification::Finish { attempts: 1 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_if_retries_retryable() {
        let (policy, _observer) = recording_policy(5);

        let mut calls = 0;
        let r: Result<&str, &str> = policy
            .retry_if(
                "transient",
                |e: &&str| *e == "transient",
                || {
                    calls += 1;
                    let n = calls;
                    async move { if n < 4 { Err("transient") } else { Ok("done") } }
                },
            )
            .await;

        assert_eq!(r, Ok("done"));
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn log_observer_writes_debug() {
        let capture = TracingCapture::new();
        let policy = BackoffPolicy::new(config(2));

        let r: Result<(), ()> = policy
            .retry_with_backoff("logged task", || async { ControlFlow::Continue(()) })
            .await;
        assert!(r.is_err());

        let logs = capture.to_string();
        assert_contains!(&logs, "level = DEBUG");
        assert_contains!(&logs, "backing off before calling again");
        assert_contains!(&logs, "level = WARN");
        assert_contains!(&logs, "logged task");
    }

    #[tokio::test(start_paused = true)]
    async fn log_observer_reports_fatal_stop_as_finished() {
        let capture = TracingCapture::new();
        let policy = BackoffPolicy::new(config(3));

        let r: Result<(), &str> = policy
            .retry_if("fatal task", |_: &&str| false, || async { Err("fatal") })
            .await;
        assert_eq!(r, Err("fatal"));

        let logs = capture.to_string();
        assert_contains!(&logs, "finished");
        assert_contains!(&logs, "fatal task");
        assert_not_contains!(&logs, "completed");
        assert_not_contains!(&logs, "backing off");
    }
}
