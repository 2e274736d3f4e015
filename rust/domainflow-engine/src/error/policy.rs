//! Per-(category, severity) error policies
//!
//! A policy decides whether a classified error is retryable, how long to wait
//! between attempts, how many attempts are allowed, and whether the error must
//! be escalated or audited. The registry ships with the engine defaults and is
//! overridable from configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ErrorCategory, ErrorSeverity};

/// Policy applied to one (category, severity) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPolicy {
    /// Whether the caller may retry at all
    pub retryable: bool,
    /// Base delay before the first retry
    pub base_delay_ms: u64,
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Whether exhaustion escalates to an operator
    pub escalate: bool,
    /// Whether every occurrence is audited
    pub audit: bool,
}

impl ErrorPolicy {
    fn no_retry(escalate: bool, audit: bool) -> Self {
        Self { retryable: false, base_delay_ms: 0, max_attempts: 1, escalate, audit }
    }

    fn retry(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self { retryable: true, base_delay_ms, max_attempts, escalate: false, audit: false }
    }
}

/// Outcome of consulting the registry for one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether the caller should retry
    pub should_retry: bool,
    /// How long to wait before the retry
    pub delay: Duration,
}

impl RetryDecision {
    /// Decision that stops retrying
    pub fn stop() -> Self {
        Self { should_retry: false, delay: Duration::ZERO }
    }
}

/// Registry of error policies keyed by (category, severity)
pub struct PolicyRegistry {
    policies: HashMap<(ErrorCategory, ErrorSeverity), ErrorPolicy>,
}

impl PolicyRegistry {
    /// Build the registry with engine defaults
    pub fn new() -> Self {
        let mut policies = HashMap::new();

        // Validation and business errors are never retried
        for severity in [ErrorSeverity::Low, ErrorSeverity::Medium, ErrorSeverity::High] {
            policies.insert((ErrorCategory::Validation, severity), ErrorPolicy::no_retry(false, false));
            policies.insert((ErrorCategory::Business, severity), ErrorPolicy::no_retry(false, false));
        }

        // Transient network trouble backs off exponentially
        policies.insert((ErrorCategory::Network, ErrorSeverity::Medium), ErrorPolicy::retry(200, 5));
        policies.insert((ErrorCategory::Network, ErrorSeverity::High), ErrorPolicy::retry(500, 3));

        // Serialisation/deadlock retries are cheap and fast
        policies.insert((ErrorCategory::Database, ErrorSeverity::Medium), ErrorPolicy::retry(50, 5));
        policies.insert(
            (ErrorCategory::Database, ErrorSeverity::High),
            ErrorPolicy { retryable: true, base_delay_ms: 250, max_attempts: 3, escalate: true, audit: false },
        );

        // System failures escalate; critical always audits
        policies.insert(
            (ErrorCategory::System, ErrorSeverity::High),
            ErrorPolicy::no_retry(true, true),
        );
        policies.insert(
            (ErrorCategory::System, ErrorSeverity::Critical),
            ErrorPolicy::no_retry(true, true),
        );

        // A failed audit write is itself audited, never swallowed
        policies.insert(
            (ErrorCategory::Audit, ErrorSeverity::High),
            ErrorPolicy::no_retry(true, true),
        );

        Self { policies }
    }

    /// Override one policy, typically from configuration
    pub fn set(&mut self, category: ErrorCategory, severity: ErrorSeverity, policy: ErrorPolicy) {
        self.policies.insert((category, severity), policy);
    }

    /// Look up the policy for a pair; unknown pairs fail fast
    pub fn policy(&self, category: ErrorCategory, severity: ErrorSeverity) -> ErrorPolicy {
        self.policies
            .get(&(category, severity))
            .cloned()
            .unwrap_or_else(|| ErrorPolicy::no_retry(severity >= ErrorSeverity::High, severity == ErrorSeverity::Critical))
    }

    /// Decide whether attempt `attempt` (1-based) should be retried
    ///
    /// Delay grows exponentially from the policy's base delay.
    pub fn decide(&self, category: ErrorCategory, severity: ErrorSeverity, attempt: u32) -> RetryDecision {
        let policy = self.policy(category, severity);
        if !policy.retryable || attempt >= policy.max_attempts {
            return RetryDecision::stop();
        }
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        RetryDecision {
            should_retry: true,
            delay: Duration::from_millis(policy.base_delay_ms.saturating_mul(factor)),
        }
    }

    /// Whether occurrences of the pair must be audited
    pub fn must_audit(&self, category: ErrorCategory, severity: ErrorSeverity) -> bool {
        severity == ErrorSeverity::Critical || self.policy(category, severity).audit
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_never_retried() {
        let registry = PolicyRegistry::new();
        let decision = registry.decide(ErrorCategory::Validation, ErrorSeverity::Low, 1);
        assert!(!decision.should_retry);
    }

    #[test]
    fn network_backoff_is_exponential() {
        let registry = PolicyRegistry::new();
        let first = registry.decide(ErrorCategory::Network, ErrorSeverity::Medium, 1);
        let second = registry.decide(ErrorCategory::Network, ErrorSeverity::Medium, 2);
        assert!(first.should_retry && second.should_retry);
        assert_eq!(second.delay, first.delay * 2);
    }

    #[test]
    fn retries_exhaust_at_max_attempts() {
        let registry = PolicyRegistry::new();
        let decision = registry.decide(ErrorCategory::Database, ErrorSeverity::Medium, 5);
        assert!(!decision.should_retry);
    }

    #[test]
    fn critical_always_audits() {
        let registry = PolicyRegistry::new();
        assert!(registry.must_audit(ErrorCategory::System, ErrorSeverity::Critical));
        assert!(registry.must_audit(ErrorCategory::Audit, ErrorSeverity::High));
        assert!(!registry.must_audit(ErrorCategory::Validation, ErrorSeverity::Low));
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut registry = PolicyRegistry::new();
        registry.set(
            ErrorCategory::Network,
            ErrorSeverity::Medium,
            ErrorPolicy { retryable: false, base_delay_ms: 0, max_attempts: 1, escalate: true, audit: false },
        );
        assert!(!registry.decide(ErrorCategory::Network, ErrorSeverity::Medium, 1).should_retry);
    }
}
