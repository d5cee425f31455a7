//! Per-provider circuit breaker.
//!
//! The breaker itself is plain data: every transition takes an explicit
//! `Instant`, so callers (and tests) decide what "now" is. Providers keep
//! one behind a short-lived `std::sync::Mutex` that is never held across
//! an await point.

use crate::llm::types::ProviderCategory;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
}

impl CircuitBreakerConfig {
    /// Local backends: trip fast, recover fast
    pub const fn local() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_seconds: 60,
        }
    }

    /// Cloud and gateway backends
    pub const fn external() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 300,
        }
    }

    pub fn for_category(category: ProviderCategory) -> Self {
        match category {
            ProviderCategory::Local => Self::local(),
            _ => Self::external(),
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::external()
    }
}

/// Serializable view of a breaker for health reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub seconds_since_last_failure: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failures: u32,
    state: CircuitState,
    last_failure_time: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_thresholds(config.failure_threshold, config.recovery_timeout())
    }

    pub fn with_thresholds(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failures: 0,
            state: CircuitState::Closed,
            last_failure_time: None,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.last_failure_time
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.state = CircuitState::Closed;
        self.last_failure_time = None;
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure_time = Some(now);

        // A failed probe while half-open reopens immediately
        if self.state == CircuitState::HalfOpen || self.failures >= self.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    pub fn is_open(&mut self) -> bool {
        self.is_open_at(Instant::now())
    }

    /// Returns whether calls must be rejected at `now`.
    ///
    /// An open breaker whose recovery timeout has strictly elapsed moves to
    /// half-open and admits the next call as a probe.
    pub fn is_open_at(&mut self, now: Instant) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }

        match self.last_failure_time {
            Some(last) if now.saturating_duration_since(last) <= self.recovery_timeout => true,
            _ => {
                self.state = CircuitState::HalfOpen;
                false
            }
        }
    }

    pub fn snapshot_at(&self, now: Instant) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failures: self.failures,
            failure_threshold: self.failure_threshold,
            recovery_timeout_seconds: self.recovery_timeout.as_secs(),
            seconds_since_last_failure: self
                .last_failure_time
                .map(|last| now.saturating_duration_since(last).as_secs()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::with_thresholds(threshold, Duration::from_secs(timeout_secs))
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut cb = breaker(3, 60);
        let t0 = Instant::now();

        cb.record_failure_at(t0);
        cb.record_failure_at(t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open_at(t0));

        cb.record_failure_at(t0);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open_at(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_recovers_only_after_timeout_elapsed() {
        let mut cb = breaker(1, 60);
        let t0 = Instant::now();
        cb.record_failure_at(t0);

        assert!(cb.is_open_at(t0 + Duration::from_secs(59)));
        assert!(cb.is_open_at(t0 + Duration::from_secs(60)));
        assert!(!cb.is_open_at(t0 + Duration::from_secs(61)));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = breaker(5, 10);
        let t0 = Instant::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }
        let probe_time = t0 + Duration::from_secs(11);
        assert!(!cb.is_open_at(probe_time));

        cb.record_failure_at(probe_time);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open_at(probe_time + Duration::from_secs(1)));
    }

    #[test]
    fn test_success_resets() {
        let mut cb = breaker(2, 10);
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        cb.record_failure_at(t0);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert!(cb.last_failure_time().is_none());
        assert_eq!(cb.snapshot_at(t0).seconds_since_last_failure, None);
        assert!(!cb.is_open_at(t0));
    }

    #[test]
    fn test_category_defaults() {
        assert_eq!(
            CircuitBreakerConfig::for_category(ProviderCategory::Local),
            CircuitBreakerConfig::local()
        );
        assert_eq!(
            CircuitBreakerConfig::for_category(ProviderCategory::Gateway).failure_threshold,
            5
        );
        assert_eq!(
            CircuitBreakerConfig::external().recovery_timeout(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_snapshot_reports_elapsed() {
        let mut cb = breaker(3, 60);
        let t0 = Instant::now();
        cb.record_failure_at(t0);

        let snapshot = cb.snapshot_at(t0 + Duration::from_secs(7));
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.seconds_since_last_failure, Some(7));
        assert_eq!(snapshot.state, CircuitState::Closed);
    }
}
