//! Bounded polling for checks that wait on starting services
//!
//! Containers are often reported "running" well before the process inside
//! them accepts connections. Checks that probe live services compose with
//! [`RetryScheduler`] instead of looping themselves.

use super::console::Reporter;
use super::types::{Check, CheckStatus, SubResult};
use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Something whose outcome may call for another attempt
pub trait Retryable {
    fn needs_retry(&self) -> bool;
    fn failing(&self) -> usize;
}

impl Retryable for Check {
    fn needs_retry(&self) -> bool {
        !matches!(self.status, CheckStatus::Pass | CheckStatus::Skip) && self.failing_sub_results() > 0
    }

    fn failing(&self) -> usize {
        self.failing_sub_results()
    }
}

impl Retryable for Vec<SubResult> {
    fn needs_retry(&self) -> bool {
        self.iter().any(SubResult::is_fail)
    }

    fn failing(&self) -> usize {
        self.iter().filter(|r| r.is_fail()).count()
    }
}

/// Errors end the polling immediately
impl<T: Retryable, E> Retryable for Result<T, E> {
    fn needs_retry(&self) -> bool {
        matches!(self, Ok(value) if value.needs_retry())
    }

    fn failing(&self) -> usize {
        self.as_ref().map(Retryable::failing).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_wait: Duration,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(120),
            interval: Duration::from_secs(10),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_wait: Duration::from_secs(config.max_wait_secs),
            interval: Duration::from_secs(config.interval_secs),
        }
    }
}

pub struct RetryScheduler<'a> {
    policy: RetryPolicy,
    reporter: &'a dyn Reporter,
}

impl<'a> RetryScheduler<'a> {
    pub fn new(policy: RetryPolicy, reporter: &'a dyn Reporter) -> Self {
        Self { policy, reporter }
    }

    fn announce(&self, subject: &str, failing: usize, elapsed: Duration) {
        self.reporter.notice(&format!(
            "⏳ {subject}: {failing} failing, retrying in {}s ({}s of {}s elapsed)...",
            self.policy.interval.as_secs(),
            elapsed.as_secs(),
            self.policy.max_wait.as_secs()
        ));
    }

    /// Run `probe` until it stops failing or the wait budget is spent.
    /// Returns the last result.
    pub async fn with_retry<T, F, Fut>(&self, subject: &str, mut probe: F) -> T
    where
        T: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let mut result = probe().await;
        let mut attempt = 1u32;

        while result.needs_retry() && started.elapsed() < self.policy.max_wait {
            self.announce(subject, result.failing(), started.elapsed());
            tokio::time::sleep(self.policy.interval).await;
            attempt += 1;
            debug!(subject, attempt, "retrying probe");
            result = probe().await;
        }

        debug!(subject, attempts = attempt, failing = result.failing(), "retry finished");
        result
    }

    /// Probe every item, then re-probe only the failing ones and splice
    /// their new results in place of the old.
    pub async fn with_partial_retry<'i, I, F, Fut>(&self, subject: &str, items: &'i [I], mut probe: F) -> Vec<SubResult>
    where
        F: FnMut(&'i I) -> Fut,
        Fut: Future<Output = SubResult>,
    {
        let started = Instant::now();
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(probe(item).await);
        }

        while results.needs_retry() && started.elapsed() < self.policy.max_wait {
            self.announce(subject, results.failing(), started.elapsed());
            tokio::time::sleep(self.policy.interval).await;
            for (index, item) in items.iter().enumerate() {
                if results[index].is_fail() {
                    results[index] = probe(item).await;
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::doctor::types::{CheckDetails, CheckName};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter(Mutex<Vec<String>>);

    impl Reporter for RecordingReporter {
        fn notice(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn check_failing_until(attempts: &AtomicU32, succeed_on: u32) -> Check {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let sub = if n >= succeed_on {
            SubResult::pass("db", "reachable")
        } else {
            SubResult::fail("db", "refused")
        };
        Check::new(CheckName::ContainerConnectivity)
            .with_details(CheckDetails::Connectivity { tests: vec![sub] })
            .conclude_from_details(|_, _, _| "done".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_within_budget() {
        let reporter = RecordingReporter::default();
        let scheduler = RetryScheduler::new(RetryPolicy::default(), &reporter);
        let attempts = AtomicU32::new(0);

        // Fails the first 3 invocations
        let check = scheduler
            .with_retry("connectivity", || async { check_failing_until(&attempts, 4) })
            .await;

        assert_eq!(check.status, CheckStatus::Pass);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(reporter.0.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_retries_fit_exactly_in_budget() {
        let reporter = RecordingReporter::default();
        let scheduler = RetryScheduler::new(RetryPolicy::default(), &reporter);
        let attempts = AtomicU32::new(0);

        // K = 12 failures, 12 * 10s == 120s
        let check = scheduler
            .with_retry("connectivity", || async { check_failing_until(&attempts, 13) })
            .await;

        assert_eq!(check.status, CheckStatus::Pass);
        assert_eq!(attempts.load(Ordering::SeqCst), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_failure_when_budget_exhausted() {
        let reporter = RecordingReporter::default();
        let scheduler = RetryScheduler::new(RetryPolicy::default(), &reporter);
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        // K = 13 failures, 13 * 10s > 120s
        let check = scheduler
            .with_retry("connectivity", || async { check_failing_until(&attempts, 14) })
            .await;

        assert_eq!(check.status, CheckStatus::Fail);
        assert_eq!(attempts.load(Ordering::SeqCst), 13);
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_and_skip_return_immediately() {
        let reporter = RecordingReporter::default();
        let scheduler = RetryScheduler::new(RetryPolicy::default(), &reporter);
        let calls = AtomicU32::new(0);

        let check = scheduler
            .with_retry("certificates", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Check::new(CheckName::SslCertificates).skip("not applicable")
            })
            .await;

        assert_eq!(check.status, CheckStatus::Skip);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reporter.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_stop_polling() {
        let reporter = RecordingReporter::default();
        let scheduler = RetryScheduler::new(RetryPolicy::default(), &reporter);
        let calls = AtomicU32::new(0);

        let result: Result<Check, String> = scheduler
            .with_retry("containers", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("engine gone".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_retry_only_reprobes_failures() {
        let reporter = RecordingReporter::default();
        let policy = RetryPolicy {
            max_wait: Duration::from_secs(30),
            interval: Duration::from_secs(10),
        };
        let scheduler = RetryScheduler::new(policy, &reporter);
        let probes: Mutex<Vec<&str>> = Mutex::new(Vec::new());
        let worker_attempts = AtomicU32::new(0);
        let items = ["database", "worker"];

        let results = scheduler
            .with_partial_retry("edges", &items[..], |item| {
                probes.lock().unwrap().push(*item);
                let result = if *item == "worker" && worker_attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    SubResult::fail(*item, "refused")
                } else {
                    SubResult::pass(*item, "ok")
                };
                async move { result }
            })
            .await;

        assert!(results.iter().all(|r| !r.is_fail()));
        assert_eq!(results[0].label, "database");
        assert_eq!(
            *probes.lock().unwrap(),
            vec!["database", "worker", "worker", "worker"]
        );
    }
}
