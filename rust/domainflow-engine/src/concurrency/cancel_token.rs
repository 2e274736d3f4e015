//! Cancellation tokens
//!
//! Cooperative cancellation for scheduled tasks with hierarchical scopes: a
//! root token owns the process lifecycle and every background service holds a
//! child. Cancelling the parent cancels all children; a child cancels alone.
//!
//! # Example
//! ```no_run
//! use domainflow_engine::concurrency::CancelToken;
//!
//! async fn example() {
//!     let root = CancelToken::new();
//!     let child = root.child_token();
//!
//!     tokio::spawn(async move {
//!         loop {
//!             tokio::select! {
//!                 _ = child.cancelled() => break,
//!                 _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
//!                     // periodic work
//!                 }
//!             }
//!         }
//!     });
//!
//!     root.cancel();
//! }
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// A token for cooperative task cancellation
///
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// Create a new root token
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { inner: Arc::new(Inner { tx, rx, parent: None }) }
    }

    /// Create a child token
    ///
    /// The child is cancelled when either it or any ancestor is cancelled.
    pub fn child_token(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        Self { inner: Arc::new(Inner { tx, rx, parent: Some(self.clone()) }) }
    }

    /// Cancel this token and, transitively, every child
    pub fn cancel(&self) {
        // Children watch their ancestors, no fan-out bookkeeping needed
        let _ = self.inner.tx.send(true);
    }

    /// Whether this token or any ancestor has been cancelled
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.rx.borrow() {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Wait until cancelled; returns immediately if already cancelled
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Watch this token and every ancestor; the chain is flattened here so
        // the future stays finitely sized
        let mut receivers = Vec::new();
        let mut current = Some(self.clone());
        while let Some(token) = current {
            receivers.push(token.inner.rx.clone());
            current = token.inner.parent.clone();
        }
        let waiters: Vec<futures::future::BoxFuture<'static, ()>> = receivers
            .into_iter()
            .map(|mut rx| {
                Box::pin(async move {
                    while !*rx.borrow() {
                        // Sender lives inside `inner`, changed() errs only on teardown
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                }) as futures::future::BoxFuture<'static, ()>
            })
            .collect();
        futures::future::select_all(waiters).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken").field("cancelled", &self.is_cancelled()).finish()
    }
}
