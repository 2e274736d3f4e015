//! Config manager

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::concurrency::CancelToken;
use crate::error::{DomainFlowError, EngineResult};
use crate::genconfig::{ConfigVersion, GenerationConfigState};
use crate::locks::{LockMode, ResourceLockManager};
use crate::storage::{TransactionRunner, Tx, TxOptions};

/// Resource type under which config locks are taken
pub const CONFIG_RESOURCE: &str = "config";

/// Kind of coordinated access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    /// Shared lock
    Read,
    /// Exclusive lock
    Write,
}

/// Counter snapshot for observability
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigManagerMetrics {
    /// Cache hits on `get`
    pub cache_hits: u64,
    /// Cache misses on `get`
    pub cache_misses: u64,
    /// Successful updates
    pub updates: u64,
    /// Coordinated accesses served
    pub coordinations: u64,
}

/// Versioned, hash-addressed config manager
pub struct ConfigManager {
    runner: Arc<TransactionRunner>,
    locks: Arc<ResourceLockManager>,
    cache: DashMap<String, ConfigVersion>,
    /// Per-hash writer serialisation
    key_locks: DashMap<String, Arc<RwLock<()>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    updates: AtomicU64,
    coordinations: AtomicU64,
    /// TTL on coordinated-access locks
    lock_ttl: Duration,
}

impl ConfigManager {
    /// Create a manager over the store
    pub fn new(runner: Arc<TransactionRunner>, locks: Arc<ResourceLockManager>) -> Self {
        Self {
            runner,
            locks,
            cache: DashMap::new(),
            key_locks: DashMap::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            coordinations: AtomicU64::new(0),
            lock_ttl: Duration::from_secs(30),
        }
    }

    fn key_lock(&self, config_hash: &str) -> Arc<RwLock<()>> {
        self.key_locks
            .entry(config_hash.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Cache-first read returning a deep copy
    pub fn get(&self, config_hash: &str) -> EngineResult<Option<ConfigVersion>> {
        if let Some(mut cached) = self.cache.get_mut(config_hash) {
            cached.last_accessed = chrono::Utc::now();
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            let mut copy = cached.clone();
            copy.state = cached.state.deep_copy();
            return Ok(Some(copy));
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        match self.runner.store().load_config_state(config_hash)? {
            Some(state) => {
                let version = ConfigVersion::new(state.deep_copy(), state.version);
                self.cache.insert(config_hash.to_string(), version.clone());
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    /// Create the state row for a hash if it does not exist yet
    pub async fn ensure(
        &self,
        token: &CancelToken,
        config_hash: &str,
        config_details: Value,
    ) -> EngineResult<ConfigVersion> {
        if let Some(existing) = self.get(config_hash)? {
            return Ok(existing);
        }
        let key_lock = self.key_lock(config_hash);
        let _guard = key_lock.write().await;
        let hash = config_hash.to_string();
        let state = self
            .runner
            .run(token, TxOptions::system("ensure_config_state"), move |tx| {
                if let Some(existing) = tx.store().load_config_state(&hash)? {
                    return Ok(existing);
                }
                let state = GenerationConfigState::new(hash.clone(), config_details.clone());
                tx.put_config_state(&state)?;
                Ok(state)
            })
            .await?;
        let version = ConfigVersion::new(state.deep_copy(), state.version);
        self.cache.insert(config_hash.to_string(), version.clone());
        Ok(version)
    }

    /// Copy-on-write update
    ///
    /// Loads the current state, invokes `f` on a deep copy together with the
    /// transaction (so callers stage dependent rows into the same commit),
    /// persists the result with a version bump, publishes the new version to
    /// cache, and returns it. Serialised per hash; a concurrent external
    /// writer surfaces as [`DomainFlowError::ConfigVersionMismatch`].
    pub async fn update<T, F>(
        &self,
        token: &CancelToken,
        config_hash: &str,
        mut f: F,
    ) -> EngineResult<(ConfigVersion, T)>
    where
        F: FnMut(&mut GenerationConfigState, &mut Tx<'_>) -> EngineResult<T>,
        T: Send,
    {
        let key_lock = self.key_lock(config_hash);
        let _guard = key_lock.write().await;

        let expected_version = match self.get(config_hash)? {
            Some(version) => version.state.version,
            None => return Err(DomainFlowError::ConfigNotFound(config_hash.to_string())),
        };

        let hash = config_hash.to_string();
        let result = self
            .runner
            .run(token, TxOptions::system("update_config_state"), move |tx| {
                let current = tx
                    .store()
                    .load_config_state(&hash)?
                    .ok_or_else(|| DomainFlowError::ConfigNotFound(hash.clone()))?;
                if current.version != expected_version {
                    return Err(DomainFlowError::ConfigVersionMismatch {
                        config_hash: hash.clone(),
                        expected: expected_version,
                        found: current.version,
                    });
                }
                let mut copy = current.deep_copy();
                let out = f(&mut copy, tx)?;
                copy.version = current.version + 1;
                copy.updated_at = chrono::Utc::now();
                tx.put_config_state(&copy)?;
                Ok((copy, out))
            })
            .await;
        let (new_state, out) = match result {
            Ok(pair) => pair,
            Err(err) => {
                if matches!(err, DomainFlowError::ConfigVersionMismatch { .. }) {
                    // The cached snapshot is stale; a retry must refetch
                    self.invalidate(config_hash);
                }
                return Err(err);
            }
        };

        let version = ConfigVersion::new(new_state.deep_copy(), new_state.version);
        self.cache.insert(config_hash.to_string(), version.clone());
        self.updates.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("config_updates_total").increment(1);
        debug!(config_hash, version = version.version, "config state updated");
        Ok((version, out))
    }

    /// `update` with retry on version mismatch
    ///
    /// Backs off `50 ms · attempt` between attempts.
    pub async fn update_with_retry<T, F>(
        &self,
        token: &CancelToken,
        config_hash: &str,
        mut f: F,
        max_retries: u32,
    ) -> EngineResult<(ConfigVersion, T)>
    where
        F: FnMut(&mut GenerationConfigState, &mut Tx<'_>) -> EngineResult<T>,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.update(token, config_hash, &mut f).await {
                Err(DomainFlowError::ConfigVersionMismatch { .. }) if attempt <= max_retries => {
                    let delay = Duration::from_millis(50).saturating_mul(attempt);
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(DomainFlowError::Cancelled("update_config_state".into()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    /// Invoke `f` on a state snapshot under a shared or exclusive config lock
    ///
    /// Workers use this when they need a snapshot consistent with a later
    /// write by the same actor.
    pub async fn coordinate_access<T, F>(
        &self,
        token: &CancelToken,
        config_hash: &str,
        op: AccessOp,
        actor: &str,
        f: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&GenerationConfigState) -> EngineResult<T>,
    {
        let mode = match op {
            AccessOp::Read => LockMode::Shared,
            AccessOp::Write => LockMode::Exclusive,
        };
        debug!(config_hash, actor, ?op, "coordinated config access");
        let result = self
            .locks
            .with_lock(token, CONFIG_RESOURCE, config_hash, mode, self.lock_ttl, || async {
                let version = self
                    .get(config_hash)?
                    .ok_or_else(|| DomainFlowError::ConfigNotFound(config_hash.to_string()))?;
                f(&version.state)
            })
            .await;
        self.coordinations.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Drop the cache entry for a hash
    pub fn invalidate(&self, config_hash: &str) {
        self.cache.remove(config_hash);
    }

    /// Counter snapshot
    pub fn metrics(&self) -> ConfigManagerMetrics {
        ConfigManagerMetrics {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            coordinations: self.coordinations.load(Ordering::Relaxed),
        }
    }
}
