//! Error manager: classification, policy, and circuit gating in one surface
//!
//! Callers hand every recoverable failure to [`ErrorManager::assess`], which
//! classifies it, consults the policy registry and the category's circuit
//! breaker, and returns the `(should_retry, delay)` pair. Errors whose policy
//! demands it are audited; escalations are logged loudly. Nothing is
//! swallowed: every assessed error is retried, escalated, or audited.

use std::time::Duration;
use tracing::{error, warn};

use crate::error::{
    CircuitBreakerRegistry, DomainFlowError, EnhancedError, ErrorClassifier, PolicyRegistry,
    RetryDecision,
};

/// Composes the classifier, policy registry, and circuit breakers
pub struct ErrorManager {
    policies: PolicyRegistry,
    circuits: CircuitBreakerRegistry,
}

impl ErrorManager {
    /// Build with explicit policies and default circuit thresholds
    pub fn new(policies: PolicyRegistry) -> Self {
        Self {
            policies,
            circuits: CircuitBreakerRegistry::new(5, Duration::from_secs(60), Duration::from_secs(30)),
        }
    }

    /// Build with custom circuit thresholds
    pub fn with_circuits(policies: PolicyRegistry, circuits: CircuitBreakerRegistry) -> Self {
        Self { policies, circuits }
    }

    /// The circuit breakers, for callers that gate before attempting
    pub fn circuits(&self) -> &CircuitBreakerRegistry {
        &self.circuits
    }

    /// Assess one failed attempt (1-based) of an operation
    ///
    /// Records the failure against the category's circuit, audits when the
    /// policy demands it, and decides whether the caller should retry. A
    /// retry is only granted while the circuit stays closed.
    pub fn assess(&self, err: &DomainFlowError, attempt: u32, request_id: &str) -> (EnhancedError, RetryDecision) {
        let enhanced = ErrorClassifier::classify(err, request_id);
        let breaker = self.circuits.for_category(enhanced.category);
        breaker.record_failure();

        let policy = self.policies.policy(enhanced.category, enhanced.severity);
        if self.policies.must_audit(enhanced.category, enhanced.severity) {
            // The structured log line is the audit record's last-resort sink
            error!(
                error_id = %enhanced.id,
                severity = %enhanced.severity,
                category = %enhanced.category,
                request_id = %enhanced.request_id,
                message = %enhanced.message,
                "audited error"
            );
            metrics::counter!("errors_audited_total", "category" => enhanced.category.to_string())
                .increment(1);
        }
        if policy.escalate {
            warn!(
                error_id = %enhanced.id,
                category = %enhanced.category,
                "error escalated to operator"
            );
            metrics::counter!("errors_escalated_total", "category" => enhanced.category.to_string())
                .increment(1);
        }

        let decision = if breaker.check().is_err() {
            RetryDecision::stop()
        } else {
            self.policies.decide(enhanced.category, enhanced.severity, attempt)
        };
        (enhanced, decision)
    }

    /// Record a successful attempt so the category's circuit can close
    pub fn record_success(&self, err_category: crate::error::ErrorCategory) {
        self.circuits.for_category(err_category).record_success();
    }
}
