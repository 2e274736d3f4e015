//! Distributed-locking decorator for the config manager
//!
//! Wraps `update` in an exclusive config lock and interposes optional
//! pre-update validation and post-update integrity verification. If either
//! hook fails the update is rolled back and the hook error surfaces.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::concurrency::CancelToken;
use crate::error::{DomainFlowError, EngineResult};
use crate::genconfig::manager::{ConfigManager, CONFIG_RESOURCE};
use crate::genconfig::types::{ConfigVersion, GenerationConfigState};
use crate::locks::{LockMode, ResourceLockManager};
use crate::storage::Tx;

/// Hooks run around a coordinated update
#[async_trait]
pub trait ConfigUpdateValidator: Send + Sync {
    /// Validate the current state before the update runs
    async fn validate(&self, state: &GenerationConfigState) -> EngineResult<()>;

    /// Verify integrity of the new state after the update committed
    async fn verify(&self, state: &GenerationConfigState) -> EngineResult<()>;
}

/// Counter snapshot for the decorator
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinationMetrics {
    /// Distributed locks taken
    pub lock_acquisitions: u64,
    /// Hook pairs that passed
    pub validations: u64,
    /// Updates rolled back by a failed hook
    pub rollbacks: u64,
}

/// Config manager decorated with distributed locking and validation hooks
pub struct CoordinatedConfigManager {
    inner: Arc<ConfigManager>,
    locks: Arc<ResourceLockManager>,
    validator: Option<Arc<dyn ConfigUpdateValidator>>,
    lock_ttl: Duration,
    lock_acquisitions: AtomicU64,
    validations: AtomicU64,
    rollbacks: AtomicU64,
}

impl CoordinatedConfigManager {
    /// Decorate a config manager
    pub fn new(
        inner: Arc<ConfigManager>,
        locks: Arc<ResourceLockManager>,
        validator: Option<Arc<dyn ConfigUpdateValidator>>,
    ) -> Self {
        Self {
            inner,
            locks,
            validator,
            lock_ttl: Duration::from_secs(30),
            lock_acquisitions: AtomicU64::new(0),
            validations: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// The undecorated manager
    pub fn inner(&self) -> &Arc<ConfigManager> {
        &self.inner
    }

    /// `update` under an exclusive distributed config lock with hooks
    pub async fn update<T, F>(
        &self,
        token: &CancelToken,
        config_hash: &str,
        f: F,
    ) -> EngineResult<(ConfigVersion, T)>
    where
        F: FnMut(&mut GenerationConfigState, &mut Tx<'_>) -> EngineResult<T>,
        T: Send,
    {
        self.locks
            .with_lock(token, CONFIG_RESOURCE, config_hash, LockMode::Exclusive, self.lock_ttl, || async {
                self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("config_distributed_locks_total").increment(1);

                let before = self
                    .inner
                    .get(config_hash)?
                    .ok_or_else(|| DomainFlowError::ConfigNotFound(config_hash.to_string()))?;
                if let Some(validator) = &self.validator {
                    validator.validate(&before.state).await?;
                }

                let (version, out) = self.inner.update(token, config_hash, f).await?;

                if let Some(validator) = &self.validator {
                    if let Err(err) = validator.verify(&version.state).await {
                        warn!(config_hash, error = %err, "post-update verification failed, rolling back");
                        self.rollbacks.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("config_update_rollbacks_total").increment(1);
                        let restore = before.state.clone();
                        self.inner
                            .update(token, config_hash, move |state, _tx| {
                                state.last_offset = restore.last_offset;
                                state.config_details = restore.config_details.clone();
                                Ok(())
                            })
                            .await?;
                        return Err(err);
                    }
                    self.validations.fetch_add(1, Ordering::Relaxed);
                }

                Ok((version, out))
            })
            .await
    }

    /// Counter snapshot
    pub fn metrics(&self) -> CoordinationMetrics {
        CoordinationMetrics {
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StateStore, TransactionRunner};
    use serde_json::json;
    use tempfile::TempDir;

    struct OffsetCap(u64);

    #[async_trait]
    impl ConfigUpdateValidator for OffsetCap {
        async fn validate(&self, _state: &GenerationConfigState) -> EngineResult<()> {
            Ok(())
        }

        async fn verify(&self, state: &GenerationConfigState) -> EngineResult<()> {
            if state.last_offset > self.0 {
                return Err(DomainFlowError::Validation(format!(
                    "offset {} exceeds cap {}",
                    state.last_offset, self.0
                )));
            }
            Ok(())
        }
    }

    fn decorated(cap: u64) -> (TempDir, Arc<ConfigManager>, CoordinatedConfigManager) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()).unwrap());
        let runner = Arc::new(TransactionRunner::new(store));
        let locks = Arc::new(ResourceLockManager::new(Arc::clone(&runner), "coordinated-tests"));
        let inner = Arc::new(ConfigManager::new(runner, Arc::clone(&locks)));
        let decorated =
            CoordinatedConfigManager::new(Arc::clone(&inner), locks, Some(Arc::new(OffsetCap(cap))));
        (dir, inner, decorated)
    }

    #[tokio::test]
    async fn verified_update_goes_through() {
        let (_dir, inner, decorated) = decorated(100);
        let token = CancelToken::new();
        inner.ensure(&token, "hash-1", json!({})).await.unwrap();
        let (version, _) = decorated
            .update(&token, "hash-1", |state, _tx| {
                state.last_offset = 10;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(version.state.last_offset, 10);
        let m = decorated.metrics();
        assert_eq!(m.lock_acquisitions, 1);
        assert_eq!(m.validations, 1);
        assert_eq!(m.rollbacks, 0);
    }

    #[tokio::test]
    async fn failed_verification_rolls_back() {
        let (_dir, inner, decorated) = decorated(5);
        let token = CancelToken::new();
        inner.ensure(&token, "hash-2", json!({"keep": true})).await.unwrap();
        let result = decorated
            .update(&token, "hash-2", |state, _tx| {
                state.last_offset = 50;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        let current = inner.get("hash-2").unwrap().unwrap();
        assert_eq!(current.state.last_offset, 0);
        assert_eq!(current.state.config_details, json!({"keep": true}));
        assert_eq!(decorated.metrics().rollbacks, 1);
    }

    #[tokio::test]
    async fn lock_is_released_after_update() {
        let (_dir, inner, decorated) = decorated(100);
        let token = CancelToken::new();
        inner.ensure(&token, "hash-3", json!({})).await.unwrap();
        decorated
            .update(&token, "hash-3", |state, _tx| {
                state.last_offset += 1;
                Ok(())
            })
            .await
            .unwrap();
        let store = inner.get("hash-3").unwrap();
        assert!(store.is_some());
        // A second update acquires cleanly
        decorated
            .update(&token, "hash-3", |state, _tx| {
                state.last_offset += 1;
                Ok(())
            })
            .await
            .unwrap();
    }
}
