//! Per-category circuit breakers
//!
//! A breaker opens after a configured number of failures inside a sliding
//! window and rejects further attempts with `circuit_open` until a cool-down
//! passes. After the cool-down the breaker goes half-open and a handful of
//! successful probes close it again.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{DomainFlowError, EngineResult, ErrorCategory};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, rejecting attempts
    Open,
    /// Testing recovery
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    /// Failure timestamps inside the sliding window
    failures: VecDeque<Instant>,
    /// Successful probes while half-open
    probe_successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for one error category
pub struct CircuitBreaker {
    category: ErrorCategory,
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    window: Duration,
    cool_down: Duration,
    probe_threshold: u32,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `failure_threshold` failures within
    /// `window` and stays open for `cool_down`
    pub fn new(category: ErrorCategory, failure_threshold: u32, window: Duration, cool_down: Duration) -> Self {
        Self {
            category,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                probe_successes: 0,
                opened_at: None,
            }),
            failure_threshold,
            window,
            cool_down,
            probe_threshold: 3,
        }
    }

    /// Current state, advancing open → half-open when the cool-down passed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Reject or admit the next attempt
    pub fn check(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        match inner.state {
            CircuitState::Open => Err(DomainFlowError::CircuitOpen { category: self.category.to_string() }),
            CircuitState::HalfOpen | CircuitState::Closed => Ok(()),
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.probe_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.probe_successes = 0;
                    inner.opened_at = None;
                    tracing::info!(category = %self.category, "circuit closed after successful probes");
                }
            }
            CircuitState::Closed => {
                inner.failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner);

        // A failed probe re-opens immediately
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.probe_successes = 0;
            tracing::warn!(category = %self.category, "circuit re-opened by failed probe");
            return;
        }

        inner.failures.push_back(now);
        while let Some(front) = inner.failures.front() {
            if now.duration_since(*front) > self.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }

        if inner.state == CircuitState::Closed && inner.failures.len() as u32 >= self.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            metrics::counter!("error_circuit_opened_total", "category" => self.category.to_string())
                .increment(1);
            tracing::warn!(
                category = %self.category,
                failures = inner.failures.len(),
                "circuit opened"
            );
        }
    }

    /// Execute an operation under circuit protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.check()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.cool_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_successes = 0;
                }
            }
        }
    }
}

/// Registry of one breaker per error category
pub struct CircuitBreakerRegistry {
    breakers: Vec<(ErrorCategory, CircuitBreaker)>,
}

impl CircuitBreakerRegistry {
    /// Build breakers for every category with shared thresholds
    pub fn new(failure_threshold: u32, window: Duration, cool_down: Duration) -> Self {
        let breakers = ErrorCategory::all()
            .into_iter()
            .map(|category| {
                (category, CircuitBreaker::new(category, failure_threshold, window, cool_down))
            })
            .collect();
        Self { breakers }
    }

    /// Breaker for a category
    pub fn for_category(&self, category: ErrorCategory) -> &CircuitBreaker {
        // Registry is built from `ErrorCategory::all`, lookup cannot miss
        self.breakers
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, b)| b)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            ErrorCategory::Network,
            3,
            Duration::from_secs(60),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(), Err(DomainFlowError::CircuitOpen { .. })));
    }

    #[test]
    fn half_opens_after_cool_down_and_closes_on_probes() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn execute_records_outcomes() {
        let cb = breaker();
        let ok: EngineResult<u32> = cb.execute(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        for _ in 0..3 {
            let _ = cb
                .execute(|| async { Err::<u32, _>(DomainFlowError::Storage("down".into())) })
                .await;
        }
        let rejected = cb.execute(|| async { Ok(1) }).await;
        assert!(matches!(rejected, Err(DomainFlowError::CircuitOpen { .. })));
    }

    #[test]
    fn registry_covers_every_category() {
        let registry =
            CircuitBreakerRegistry::new(5, Duration::from_secs(30), Duration::from_secs(10));
        for category in ErrorCategory::all() {
            assert_eq!(registry.for_category(category).state(), CircuitState::Closed);
        }
    }
}
