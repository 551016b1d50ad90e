// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Best-effort delivery.
//!
//! [`DeliveryTransport::send`] never blocks, never returns an error and
//! never panics. It first offers the serialized envelope to the
//! fire-and-forget beacon path; if the beacon is missing or refuses, it
//! falls back to an asynchronous POST whose outcome is ignored.

use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::EventEnvelope;
use crate::error::TransportError;

/// A serialized envelope ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub event: String,
    pub body: String,
}

/// Host delivery primitives.
pub trait Transport: Send + Sync {
    /// Queue `payload` without waiting on the network. Returns `false` if
    /// the payload was not accepted.
    fn beacon(&self, endpoint: &str, payload: &Payload) -> bool;

    /// Fire an asynchronous POST and forget about it.
    fn post(&self, endpoint: &str, payload: Payload);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn beacon(&self, endpoint: &str, payload: &Payload) -> bool {
        (**self).beacon(endpoint, payload)
    }

    fn post(&self, endpoint: &str, payload: Payload) {
        (**self).post(endpoint, payload)
    }
}

/// What happened to one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Endpoint or site id unset.
    Skipped,
    Beacon,
    Post,
    /// Serialization failed.
    Dropped,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    skipped: AtomicU64,
    beacon: AtomicU64,
    post: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub skipped: u64,
    pub beacon: u64,
    pub post: u64,
    pub dropped: u64,
}

impl DeliveryStats {
    pub fn dispatched(&self) -> u64 {
        self.beacon + self.post
    }
}

pub struct DeliveryTransport {
    endpoint: Option<String>,
    site_id: Option<String>,
    beacon_available: bool,
    transport: Arc<dyn Transport>,
    counters: DeliveryCounters,
}

impl DeliveryTransport {
    pub fn new(
        endpoint: Option<String>,
        site_id: Option<String>,
        beacon_available: bool,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            endpoint,
            site_id,
            beacon_available,
            transport,
            counters: DeliveryCounters::default(),
        }
    }

    pub fn send(&self, envelope: &EventEnvelope) -> Delivery {
        let delivery = self.dispatch(envelope);
        let counter = match delivery {
            Delivery::Skipped => &self.counters.skipped,
            Delivery::Beacon => &self.counters.beacon,
            Delivery::Post => &self.counters.post,
            Delivery::Dropped => &self.counters.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        delivery
    }

    fn dispatch(&self, envelope: &EventEnvelope) -> Delivery {
        let endpoint = match (&self.endpoint, &self.site_id) {
            (Some(endpoint), Some(site)) if !endpoint.is_empty() && !site.is_empty() => endpoint,
            _ => return Delivery::Skipped,
        };

        let body = match envelope.to_json() {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, event = envelope.event(), "dropping unserializable envelope");
                return Delivery::Dropped;
            }
        };
        let payload = Payload {
            event: envelope.event().to_string(),
            body,
        };

        if self.beacon_available && self.transport.beacon(endpoint, &payload) {
            return Delivery::Beacon;
        }
        self.transport.post(endpoint, payload);
        Delivery::Post
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            beacon: self.counters.beacon.load(Ordering::Relaxed),
            post: self.counters.post.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Capacity of the beacon queue.
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            request_timeout: Duration::from_secs(5),
        }
    }
}

struct Queued {
    endpoint: String,
    payload: Payload,
}

/// reqwest-backed transport.
///
/// The beacon is a bounded queue drained by a background tokio task; the
/// POST is a spawned one-shot request. Without a tokio runtime at
/// construction the beacon is unavailable, and POSTs are dropped.
pub struct HttpTransport {
    client: reqwest::Client,
    sender: Option<mpsc::Sender<Queued>>,
    runtime: Option<Handle>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let runtime = Handle::try_current().ok();
        let sender = runtime.as_ref().map(|handle| {
            let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
            handle.spawn(beacon_worker(client.clone(), receiver));
            sender
        });
        if runtime.is_none() {
            debug!("no tokio runtime; HTTP transport will drop deliveries");
        }

        Ok(Self {
            client,
            sender,
            runtime,
        })
    }

    fn enqueue(&self, endpoint: &str, payload: &Payload) -> Result<(), TransportError> {
        let sender = self.sender.as_ref().ok_or(TransportError::NoRuntime)?;
        sender
            .try_send(Queued {
                endpoint: endpoint.to_string(),
                payload: payload.clone(),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::ChannelFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::ChannelClosed,
            })
    }

    fn spawn_post(&self, endpoint: &str, payload: Payload) -> Result<(), TransportError> {
        let handle = self.runtime.as_ref().ok_or(TransportError::NoRuntime)?;
        let client = self.client.clone();
        let endpoint = endpoint.to_string();
        handle.spawn(async move {
            if let Err(e) = post_json(&client, &endpoint, payload.body).await {
                debug!(error = %e, event = %payload.event, "POST delivery failed");
            }
        });
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn beacon(&self, endpoint: &str, payload: &Payload) -> bool {
        match self.enqueue(endpoint, payload) {
            Ok(()) => true,
            Err(TransportError::ChannelClosed) => {
                warn!("beacon worker channel closed");
                false
            }
            Err(e) => {
                debug!(error = %e, event = %payload.event, "beacon refused");
                false
            }
        }
    }

    fn post(&self, endpoint: &str, payload: Payload) {
        let event = payload.event.clone();
        if let Err(e) = self.spawn_post(endpoint, payload) {
            debug!(error = %e, %event, "dropping POST delivery");
        }
    }
}

async fn post_json(client: &reqwest::Client, endpoint: &str, body: String) -> Result<(), TransportError> {
    client
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;
    Ok(())
}

async fn beacon_worker(client: reqwest::Client, mut receiver: mpsc::Receiver<Queued>) {
    while let Some(queued) = receiver.recv().await {
        if let Err(e) = post_json(&client, &queued.endpoint, queued.payload.body).await {
            debug!(error = %e, event = %queued.payload.event, "beacon delivery failed");
        }
    }
    debug!("beacon worker stopped");
}

/// Which primitive carried a recorded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Beacon,
    Post,
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub route: Route,
    pub endpoint: String,
    pub payload: Payload,
}

impl Sent {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload.body).unwrap_or(serde_json::Value::Null)
    }
}

/// In-memory transport that keeps everything it is given.
#[derive(Clone)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Sent>>>,
    accept_beacon: Arc<AtomicBool>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            accept_beacon: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Make every beacon call refuse, forcing the POST fallback.
    pub fn refuse_beacons(&self, refuse: bool) {
        self.accept_beacon.store(!refuse, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn envelopes(&self) -> Vec<serde_json::Value> {
        self.sent.lock().iter().map(Sent::json).collect()
    }

    /// Event names in send order.
    pub fn events(&self) -> Vec<String> {
        self.sent.lock().iter().map(|s| s.payload.event.clone()).collect()
    }

    /// Envelopes of one event type.
    pub fn of(&self, event: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.payload.event == event)
            .map(Sent::json)
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent.lock().iter().filter(|s| s.payload.event == event).count()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for RecordingTransport {
    fn beacon(&self, endpoint: &str, payload: &Payload) -> bool {
        if !self.accept_beacon.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(Sent {
            route: Route::Beacon,
            endpoint: endpoint.to_string(),
            payload: payload.clone(),
        });
        true
    }

    fn post(&self, endpoint: &str, payload: Payload) {
        self.sent.lock().push(Sent {
            route: Route::Post,
            endpoint: endpoint.to_string(),
            payload,
        });
    }
}
