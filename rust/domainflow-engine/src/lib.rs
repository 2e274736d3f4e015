//! DomainFlow campaign execution core
//!
//! The state machine that owns per-campaign lifecycle, the distributed
//! worker-coordination and resource-locking layer, the batched
//! domain-generation cursor with copy-on-write config versioning, counter
//! drift reconciliation, and the SSE broadcast fabric. These subsystems stay
//! correct under concurrent workers, crashes, restarts, and partial failures,
//! and deliver monotone, ordered, at-least-once progress to subscribers.
//!
//! # Architecture
//!
//! ```text
//! request handler ──> CampaignEngine ──> SseBroadcaster ──> clients
//!                          │  ▲
//!        WorkerCoordinator ┘  └ ConfigManager + DomainGenerator
//!                          │
//!                 TransactionRunner over StateStore
//! ```
//!
//! The store is the single source of truth; process-local caches (config
//! cache, lock held-set) are advisory and invalidated on every authoritative
//! write. Background services are select-between-timer-and-cancellation
//! loops tied to a root [`concurrency::CancelToken`].

pub mod authz;
pub mod campaign;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod genconfig;
pub mod generation;
pub mod locks;
pub mod pagination;
pub mod reconcile;
pub mod sse;
pub mod storage;
pub mod worker;

pub use authz::AuthorizationService;
pub use campaign::{Campaign, CampaignEngine, CampaignId, CampaignStatus};
pub use concurrency::CancelToken;
pub use config::{AppConfig, ConfigLoader};
pub use error::{DomainFlowError, EngineResult};
pub use genconfig::{ConfigManager, CoordinatedConfigManager};
pub use generation::{DomainGenerator, GenerationParams};
pub use locks::ResourceLockManager;
pub use pagination::{Page, PageInfo, PageRequest};
pub use reconcile::CounterReconciler;
pub use sse::SseBroadcaster;
pub use storage::{StateStore, TransactionRunner};
pub use worker::WorkerCoordinator;
