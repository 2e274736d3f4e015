//! SSE broadcaster
//!
//! A single process-wide broadcaster owns the client registry. Each client
//! has a bounded frame queue drained by exactly one writer task, which is what
//! serialises its writes; frames are never interleaved. The transport records
//! `last_seen` as it writes frames out, so a client that stops reading goes
//! stale and is reaped by the background sweep.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::campaign::CampaignId;
use crate::concurrency::CancelToken;
use crate::config::SseConfig;
use crate::error::{DomainFlowError, EngineResult};
use crate::sse::canonical::canonicalise;
use crate::sse::event::SseEvent;

/// Frames buffered per client before it counts as not reading
const CLIENT_QUEUE_DEPTH: usize = 256;

/// One subscribed client
pub struct SseClient {
    /// Client identifier, also the SSE frame id source
    pub id: Uuid,
    /// Subscribed user
    pub user_id: String,
    /// Campaign filter; `None` subscribes at user level
    pub campaign_id: Option<CampaignId>,
    tx: mpsc::Sender<String>,
    last_seen: RwLock<DateTime<Utc>>,
    cancel: CancelToken,
}

/// Receiver half handed to the transport
pub struct ClientHandle {
    /// Client identifier
    pub id: Uuid,
    /// Frame stream drained by the transport writer
    pub frames: mpsc::Receiver<String>,
    /// Cancelled when the client is unregistered
    pub cancel: CancelToken,
}

/// Process-wide SSE fan-out fabric
pub struct SseBroadcaster {
    clients: DashMap<Uuid, Arc<SseClient>>,
    config: SseConfig,
    reaped_total: AtomicU64,
}

impl SseBroadcaster {
    /// Create the broadcaster
    pub fn new(config: SseConfig) -> Self {
        Self { clients: DashMap::new(), config, reaped_total: AtomicU64::new(0) }
    }

    /// Register a client; fails at the configured cap
    pub fn register(&self, user_id: &str, campaign_id: Option<CampaignId>) -> EngineResult<ClientHandle> {
        if self.clients.len() >= self.config.max_clients {
            metrics::counter!("sse_registrations_rejected_total").increment(1);
            return Err(DomainFlowError::MaxClientsReached(self.config.max_clients));
        }
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let cancel = CancelToken::new();
        let client = Arc::new(SseClient {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            campaign_id,
            tx,
            last_seen: RwLock::new(Utc::now()),
            cancel: cancel.clone(),
        });
        let id = client.id;
        self.clients.insert(id, client);
        metrics::gauge!("sse_clients_connected").set(self.clients.len() as f64);
        debug!(client_id = %id, user_id, ?campaign_id, "sse client registered");
        Ok(ClientHandle { id, frames: rx, cancel })
    }

    /// Unregister a client and cancel its transport
    pub fn unregister(&self, client_id: Uuid) {
        if let Some((_, client)) = self.clients.remove(&client_id) {
            client.cancel.cancel();
            metrics::gauge!("sse_clients_connected").set(self.clients.len() as f64);
            debug!(client_id = %client_id, "sse client unregistered");
        }
    }

    /// Connected client count
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Clients reaped since startup
    pub fn reaped_total(&self) -> u64 {
        self.reaped_total.load(Ordering::Relaxed)
    }

    /// Whether `client` receives `event`
    ///
    /// Deliver iff the event is addressed to the client's user, or the client
    /// subscribes to the specific campaign the event carries. Unaddressed
    /// global events reach nobody.
    fn matches(client: &SseClient, event: &SseEvent) -> bool {
        if let Some(campaign_filter) = client.campaign_id {
            return event.campaign_id == Some(campaign_filter);
        }
        event.user_id.as_deref() == Some(client.user_id.as_str())
    }

    /// Render the canonical SSE text frame for an event
    pub fn format_frame(event: &SseEvent) -> String {
        let envelope = canonicalise(event);
        let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
        format!("id: {}\nevent: {}\ndata: {}\n\n", event.id, event.event_type, data)
    }

    fn deliver(&self, client: &SseClient, frame: String) -> bool {
        // last_seen is advanced by the transport when it writes the frame,
        // not here; a client that stops reading goes stale
        client.tx.try_send(frame).is_ok()
    }

    /// Record that the transport wrote a frame for `client_id`
    pub fn touch(&self, client_id: Uuid) {
        if let Some(client) = self.clients.get(&client_id) {
            *client.last_seen.write() = Utc::now();
        }
    }

    /// Fan an event out to every matching client; returns deliveries
    pub fn broadcast(&self, event: &SseEvent) -> usize {
        let frame = Self::format_frame(event);
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if Self::matches(client, event) && self.deliver(client, frame.clone()) {
                delivered += 1;
            }
        }
        metrics::counter!("sse_events_broadcast_total", "type" => event.event_type.clone()).increment(1);
        delivered
    }

    /// Deliver an event to every client of one user
    pub fn broadcast_to_user(&self, user_id: &str, event: &SseEvent) -> usize {
        let addressed = event.clone().for_user(user_id);
        let frame = Self::format_frame(&addressed);
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.user_id == user_id && self.deliver(client, frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an event to every client subscribed to one campaign
    pub fn broadcast_to_campaign(&self, campaign_id: CampaignId, event: &SseEvent) -> usize {
        let addressed = event.clone().for_campaign(campaign_id);
        let frame = Self::format_frame(&addressed);
        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.campaign_id == Some(campaign_id) && self.deliver(client, frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send one keep-alive frame to every client
    pub fn send_keep_alives(&self) {
        for entry in self.clients.iter() {
            let event = SseEvent::keep_alive();
            let frame = Self::format_frame(&event);
            self.deliver(entry.value(), frame);
        }
    }

    /// Unregister clients whose `last_seen` exceeds the stale TTL
    pub fn reap_stale(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.stale_ttl())
            .unwrap_or_else(|_| chrono::Duration::seconds(45));
        let stale: Vec<Uuid> = self
            .clients
            .iter()
            .filter(|entry| now - *entry.value().last_seen.read() > ttl)
            .map(|entry| *entry.key())
            .collect();
        let count = stale.len();
        for id in stale {
            warn!(client_id = %id, "reaping stale sse client");
            self.unregister(id);
        }
        if count > 0 {
            self.reaped_total.fetch_add(count as u64, Ordering::Relaxed);
            metrics::counter!("sse_clients_reaped_total").increment(count as u64);
        }
        count
    }

    /// Launch the keep-alive loop
    pub fn spawn_keep_alive(self: &Arc<Self>, token: CancelToken) {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broadcaster.config.keep_alive());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => broadcaster.send_keep_alives(),
                }
            }
        });
    }

    /// Launch the stale-client reaper loop
    pub fn spawn_cleanup(self: &Arc<Self>, token: CancelToken) {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broadcaster.config.cleanup());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let reaped = broadcaster.reap_stale();
                        if reaped > 0 {
                            info!(reaped, "sse cleanup pass finished");
                        }
                    }
                }
            }
        });
    }
}
