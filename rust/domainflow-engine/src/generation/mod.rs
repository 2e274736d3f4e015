//! Deterministic domain generation engine
//!
//! The keyspace is the Cartesian product of `charset^variable_length` and the
//! TLD list under a fixed ordering: label positions are lexicographic over the
//! charset with position 0 varying fastest, and TLDs cycle in their given
//! order. The engine is pure; persistence and offset advancement happen in the
//! config manager's update path so that a row at `offset_index = N` exists iff
//! `last_offset` has advanced past `N`.

use serde::{Deserialize, Serialize};

use crate::error::{DomainFlowError, EngineResult};

/// Where the constant string sits relative to the variable part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Constant before the variable part
    Prefix,
    /// Constant after the variable part
    Suffix,
    /// Constant on both sides
    Both,
}

/// Parameters of one generation keyspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Pattern kind
    pub pattern: PatternKind,
    /// Number of variable characters
    pub variable_length: u32,
    /// Ordered character set for the variable part
    pub charset: String,
    /// Constant string composed with every label
    pub constant: String,
    /// TLDs cycled in order, including the leading dot
    pub tlds: Vec<String>,
    /// Total number of domains the campaign targets
    pub target_total: u64,
}

impl GenerationParams {
    /// Validate at campaign creation time
    pub fn validate(&self) -> EngineResult<()> {
        if self.charset.is_empty() {
            return Err(DomainFlowError::Validation("character set cannot be empty".into()));
        }
        if self.tlds.is_empty() {
            return Err(DomainFlowError::Validation("TLD list cannot be empty".into()));
        }
        if self.variable_length == 0 {
            return Err(DomainFlowError::Validation("variable length must be positive".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for ch in self.charset.chars() {
            if !seen.insert(ch) {
                return Err(DomainFlowError::Validation(format!("duplicate character {:?} in charset", ch)));
            }
        }
        if self.target_total > self.keyspace_size() {
            return Err(DomainFlowError::Validation(format!(
                "target total {} exceeds keyspace size {}",
                self.target_total,
                self.keyspace_size()
            )));
        }
        Ok(())
    }

    /// Size of the full keyspace, saturating on overflow
    pub fn keyspace_size(&self) -> u64 {
        let k = self.charset.chars().count() as u64;
        let mut labels: u64 = 1;
        for _ in 0..self.variable_length {
            labels = labels.saturating_mul(k);
        }
        labels.saturating_mul(self.tlds.len() as u64)
    }
}

/// Pure enumerator over a generation keyspace
pub struct DomainGenerator;

impl DomainGenerator {
    /// The domain at one offset; a function solely of the params and offset
    pub fn domain_at(params: &GenerationParams, offset: u64) -> String {
        let charset: Vec<char> = params.charset.chars().collect();
        let k = charset.len() as u64;
        let tld_count = params.tlds.len() as u64;

        let tld = &params.tlds[(offset % tld_count) as usize];
        let mut label_index = offset / tld_count;

        // Base-k digits, position 0 varies fastest
        let mut variable = String::with_capacity(params.variable_length as usize);
        for _ in 0..params.variable_length {
            variable.push(charset[(label_index % k) as usize]);
            label_index /= k;
        }

        let label = match params.pattern {
            PatternKind::Prefix => format!("{}{}", params.constant, variable),
            PatternKind::Suffix => format!("{}{}", variable, params.constant),
            PatternKind::Both => format!("{}{}{}", params.constant, variable, params.constant),
        };

        format!("{}{}", label, tld)
    }

    /// Produce up to `batch_size` successive domains starting at `last_offset`
    ///
    /// Truncates at `target_total` so the final batch may be short. Returns
    /// the domains and the new offset.
    pub fn generate(params: &GenerationParams, last_offset: u64, batch_size: u64) -> (Vec<String>, u64) {
        let end = last_offset
            .saturating_add(batch_size)
            .min(params.target_total)
            .min(params.keyspace_size());
        if end <= last_offset {
            return (Vec::new(), last_offset);
        }
        let domains = (last_offset..end).map(|offset| Self::domain_at(params, offset)).collect();
        (domains, end)
    }
}
