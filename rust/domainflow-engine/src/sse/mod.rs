//! SSE broadcast fabric
//!
//! Canonicalises progress events into the versioned envelope and fans them
//! out to subscribed clients with per-campaign/per-user filtering, keep-alive
//! frames, and stale-client reaping. The repository's earlier non-canonical
//! broadcaster variant is gone; this module is the canonicalising one.

pub mod broadcaster;
pub mod canonical;
#[cfg(feature = "http")]
pub mod endpoints;
pub mod event;

pub use broadcaster::{ClientHandle, SseBroadcaster, SseClient};
pub use canonical::{canonicalise, CanonicalEnvelope, ENVELOPE_VERSION};
#[cfg(feature = "http")]
pub use endpoints::{router, SseState};
pub use event::{event_types, SseEvent};
