//! Concurrency primitives for background services
//!
//! Every background service (heartbeat, cleanup, reconciler, SSE keep-alive)
//! is a select-between-timer-and-cancellation loop tied to a [`CancelToken`].
//! Callers hold the token, not the task handle.

pub mod cancel_token;

pub use cancel_token::CancelToken;

pub use tokio::task::JoinHandle;
