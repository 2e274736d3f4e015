//! Copy-on-write, hash-addressed generation config management
//!
//! A generation campaign's parameters are canonicalised and hashed; the hash
//! is the sole key into the manager. Reads return deep copies so consumers
//! may mutate freely; updates run on a deep copy under a per-hash writer
//! mutex and persist a new state row with a version bump. The database, not
//! the config version, is the system of record: update closures stage their
//! domain rows into the same transaction that advances the cursor.

pub mod distributed;
pub mod manager;
pub mod types;

pub use distributed::{ConfigUpdateValidator, CoordinatedConfigManager, CoordinationMetrics};
pub use manager::{AccessOp, ConfigManager, ConfigManagerMetrics};
pub use types::{hash_generation_params, ConfigVersion, GenerationConfigState};
