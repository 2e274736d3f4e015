//! Versioned generation-config state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::generation::GenerationParams;

/// Persisted, hash-addressed generation cursor state
///
/// Keyed by `config_hash`; mutated strictly through copy-on-write with a
/// version bump. The `version` counter backs optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfigState {
    /// Hash of the canonicalised generation parameters
    pub config_hash: String,
    /// Next offset to enumerate from
    pub last_offset: u64,
    /// Opaque config detail blob, cloned rather than aliased on every read
    pub config_details: Value,
    /// Version bumped on every successful update
    pub version: u64,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl GenerationConfigState {
    /// Fresh state at offset zero
    pub fn new(config_hash: impl Into<String>, config_details: Value) -> Self {
        Self {
            config_hash: config_hash.into(),
            last_offset: 0,
            config_details,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Deep copy; `config_details` is cloned, never aliased
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

/// Ephemeral wrapper the config manager hands to consumers
///
/// A new version is minted on every successful update. Consumers treat the
/// contained state as immutable and rely on deep-copy semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVersion {
    /// Version identifier
    pub id: Uuid,
    /// Hash of the config this version wraps
    pub config_hash: String,
    /// Monotone per-process version counter
    pub version: u64,
    /// Snapshot of the config state
    pub state: GenerationConfigState,
    /// When the version was minted
    pub created_at: DateTime<Utc>,
    /// When the version was last read from cache
    pub last_accessed: DateTime<Utc>,
}

impl ConfigVersion {
    /// Wrap a state snapshot
    pub fn new(state: GenerationConfigState, version: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            config_hash: state.config_hash.clone(),
            version,
            state,
            created_at: now,
            last_accessed: now,
        }
    }
}

/// Hash the canonicalised generation parameters
///
/// Canonical form is field-ordered JSON, so logically equal configs share a
/// hash regardless of construction order.
pub fn hash_generation_params(params: &GenerationParams) -> String {
    let canonical = serde_json::json!({
        "charset": params.charset,
        "constant": params.constant,
        "pattern": params.pattern,
        "target_total": params.target_total,
        "tlds": params.tlds,
        "variable_length": params.variable_length,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::PatternKind;

    fn params() -> GenerationParams {
        GenerationParams {
            pattern: PatternKind::Prefix,
            variable_length: 3,
            charset: "ab".into(),
            constant: "x".into(),
            tlds: vec![".com".into(), ".net".into()],
            target_total: 16,
        }
    }

    #[test]
    fn equal_params_share_a_hash() {
        assert_eq!(hash_generation_params(&params()), hash_generation_params(&params()));
    }

    #[test]
    fn different_params_diverge() {
        let mut other = params();
        other.charset = "abc".into();
        assert_ne!(hash_generation_params(&params()), hash_generation_params(&other));
    }

    #[test]
    fn deep_copy_does_not_alias_details() {
        let state = GenerationConfigState::new("h", serde_json::json!({"nested": {"k": 1}}));
        let mut copy = state.deep_copy();
        copy.config_details["nested"]["k"] = serde_json::json!(2);
        assert_eq!(state.config_details["nested"]["k"], serde_json::json!(1));
    }
}
