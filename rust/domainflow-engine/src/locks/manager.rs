//! Resource lock manager

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::concurrency::CancelToken;
use crate::error::{DomainFlowError, EngineResult};
use crate::locks::{LockMode, ResourceLock};
use crate::storage::{TransactionRunner, TxOptions};

/// Acquires and releases persisted resource locks on behalf of one holder
pub struct ResourceLockManager {
    runner: Arc<TransactionRunner>,
    /// Identity under which locks are taken, usually the worker id
    holder: String,
    /// Process-local held set keyed by `type|id|mode`
    held: DashMap<String, ResourceLock>,
}

impl ResourceLockManager {
    /// Create a manager acting as `holder`
    pub fn new(runner: Arc<TransactionRunner>, holder: impl Into<String>) -> Self {
        Self { runner, holder: holder.into(), held: DashMap::new() }
    }

    /// The identity this manager locks under
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn held_key(resource_type: &str, resource_id: &str, mode: LockMode) -> String {
        format!("{}|{}|{}", resource_type, resource_id, mode)
    }

    /// Acquire a lock, or fail with `LockUnavailable` on contention
    ///
    /// Checks the process-local held set first; otherwise deletes expired
    /// rows, verifies compatibility, and inserts the new row, all in one
    /// transaction.
    pub async fn acquire(
        &self,
        token: &CancelToken,
        resource_type: &str,
        resource_id: &str,
        mode: LockMode,
        ttl: Duration,
    ) -> EngineResult<String> {
        let key = Self::held_key(resource_type, resource_id, mode);
        if let Some(existing) = self.held.get(&key) {
            if !existing.is_expired(Utc::now()) {
                return Ok(existing.lock_id.clone());
            }
            drop(existing);
            self.held.remove(&key);
        }

        let holder = self.holder.clone();
        let rtype = resource_type.to_string();
        let rid = resource_id.to_string();
        let lock = self
            .runner
            .run(token, TxOptions::system("acquire_resource_lock"), move |tx| {
                let now = Utc::now();
                let rows = tx.store().locks_for(&rtype, &rid)?;
                let mut live = Vec::new();
                for row in rows {
                    if row.is_expired(now) {
                        tx.delete_lock(&row);
                    } else {
                        live.push(row);
                    }
                }

                let conflict = match mode {
                    LockMode::Exclusive => !live.is_empty(),
                    LockMode::Shared => live.iter().any(|l| l.mode == LockMode::Exclusive),
                };
                if conflict {
                    metrics::counter!("resource_lock_contention_total", "resource_type" => rtype.clone())
                        .increment(1);
                    return Err(DomainFlowError::LockUnavailable {
                        resource_type: rtype.clone(),
                        resource_id: rid.clone(),
                        reason: format!("{} holder(s) present", live.len()),
                    });
                }

                let lock = ResourceLock::new(rtype.clone(), rid.clone(), holder.clone(), mode, ttl);
                tx.put_lock(&lock)?;
                Ok(lock)
            })
            .await?;

        metrics::counter!("resource_lock_acquisitions_total", "mode" => mode.to_string()).increment(1);
        debug!(
            resource_type,
            resource_id,
            mode = %mode,
            lock_id = %lock.lock_id,
            "resource lock acquired"
        );
        let lock_id = lock.lock_id.clone();
        self.held.insert(key, lock);
        Ok(lock_id)
    }

    /// Release this holder's lock rows over the resource
    ///
    /// A non-holder release is a no-op.
    pub async fn release(
        &self,
        token: &CancelToken,
        resource_type: &str,
        resource_id: &str,
        mode: LockMode,
    ) -> EngineResult<()> {
        self.held.remove(&Self::held_key(resource_type, resource_id, mode));

        let holder = self.holder.clone();
        let rtype = resource_type.to_string();
        let rid = resource_id.to_string();
        self.runner
            .run(token, TxOptions::system("release_resource_lock"), move |tx| {
                for row in tx.store().locks_for(&rtype, &rid)? {
                    if row.holder == holder && row.mode == mode {
                        tx.delete_lock(&row);
                    }
                }
                Ok(())
            })
            .await
    }

    /// Scoped acquisition with guaranteed release on every exit path
    ///
    /// The lock is released whether the closure returns, errs, or panics; a
    /// panic is resumed after release.
    pub async fn with_lock<T, F, Fut>(
        &self,
        token: &CancelToken,
        resource_type: &str,
        resource_id: &str,
        mode: LockMode,
        ttl: Duration,
        f: F,
    ) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.acquire(token, resource_type, resource_id, mode, ttl).await?;
        let outcome = AssertUnwindSafe(f()).catch_unwind().await;
        let released = self.release(token, resource_type, resource_id, mode).await;
        match outcome {
            Ok(result) => {
                released?;
                result
            }
            Err(panic) => {
                if let Err(err) = released {
                    warn!(error = %err, "lock release failed while unwinding");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Drop the process-local held set without touching persisted rows
    ///
    /// Used on shutdown; persisted locks lapse via TTL.
    pub fn clear_local_cache(&self) {
        self.held.clear();
    }
}
