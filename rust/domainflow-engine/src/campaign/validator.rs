//! Seam for the external validator implementations
//!
//! The DNS resolver pool and HTTP fetcher live outside this crate; the engine
//! drives batches of generated domains through this trait and persists the
//! outcomes in chunks.

use async_trait::async_trait;

use crate::campaign::{GeneratedDomain, PhaseKind, ValidationReason, ValidationStatus};

/// Outcome of validating one domain
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Resulting status
    pub status: ValidationStatus,
    /// Failure reason, ignored when the status is `Ok`
    pub reason: Option<ValidationReason>,
    /// Resolved address, DNS phase only
    pub ip: Option<String>,
    /// Whether the keyword check qualified the domain, HTTP phase only
    pub qualified: Option<bool>,
}

impl ValidationOutcome {
    /// Successful outcome
    pub fn ok() -> Self {
        Self { status: ValidationStatus::Ok, reason: None, ip: None, qualified: None }
    }

    /// Failed outcome with a reason
    pub fn error(reason: ValidationReason) -> Self {
        Self { status: ValidationStatus::Error, reason: Some(reason), ip: None, qualified: None }
    }

    /// Timed-out outcome
    pub fn timeout() -> Self {
        Self {
            status: ValidationStatus::Timeout,
            reason: Some(ValidationReason::TimedOut),
            ip: None,
            qualified: None,
        }
    }
}

/// A validator the engine drives over batches of domains
#[async_trait]
pub trait PhaseValidator: Send + Sync {
    /// Phase this validator implements
    fn phase(&self) -> PhaseKind;

    /// Validate one domain
    async fn validate(&self, domain: &GeneratedDomain) -> ValidationOutcome;
}
