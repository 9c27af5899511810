//! Asynchronous signed event fan-out with retry.
//!
//! Every event routed here is matched against the namespace's registered
//! endpoints; each match becomes a delivery attempt signed with the
//! endpoint's secret. Transport failures and non-2xx responses retry with
//! exponential backoff, capped at [`MAX_DELIVERY_ATTEMPTS`] total attempts;
//! exhaustion is logged and never propagates to the caller that produced the
//! event. A per-namespace worker serializes deliveries so events arrive in
//! creation order unless chaos reordering is configured upstream.

pub mod signer;

pub use signer::{DEFAULT_TEST_SECRET, sign_payload, verify_signature};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::VirtualClock;
use crate::domain::{Event, WebhookEndpoint, event_type_matches};
use crate::error::{SimResult, SimulatorError};
use crate::store::NamespacedStore;

pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;
pub const API_VERSION: &str = "2026-08-01";
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Delay before the retry that follows `attempt` (1-based). Strictly
/// increasing, sub-second base, capped so a full retry cycle stays within
/// test-suite patience.
pub fn backoff_delay(attempt: u32) -> Duration {
    let millis = 100u64
        .saturating_mul(4u64.saturating_pow(attempt.saturating_sub(1)))
        .min(5_000);
    Duration::from_millis(millis)
}

// ============================================================================
// Transport
// ============================================================================

/// Outgoing POST seam. The real transport uses reqwest; tests substitute
/// scripted in-memory implementations.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Returns the HTTP status code, or a transport-level error message.
    async fn post(&self, url: &str, headers: &DeliveryHeaders, body: &str)
    -> Result<u16, String>;
}

#[derive(Debug, Clone)]
pub struct DeliveryHeaders {
    pub signature: String,
    pub event_id: String,
    pub timestamp: i64,
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: &DeliveryHeaders,
        body: &str,
    ) -> Result<u16, String> {
        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Paymock-Signature", &headers.signature)
            .header("Paymock-Webhook-Id", &headers.event_id)
            .header("Paymock-Webhook-Timestamp", headers.timestamp.to_string())
            .body(body.to_string())
            .send()
            .await
            .map(|response| response.status().as_u16())
            .map_err(|e| format!("HTTP error: {e}"))
    }
}

// ============================================================================
// Modes, attempts, outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Fire-and-forget through the namespace worker (the default).
    Async,
    /// `deliver_sync` blocks until every attempt reaches a terminal state.
    Sync,
    /// No network call; payloads are stored for in-test inspection.
    Collect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Delivered,
    Retrying,
    Exhausted,
}

/// One row in the per-event delivery log.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAttempt {
    pub event_id: String,
    pub endpoint_id: String,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub response_status: Option<u16>,
    pub error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub endpoint_id: String,
    pub delivered: bool,
    pub attempts: u32,
}

/// A webhook captured in collect mode instead of being sent.
#[derive(Debug, Clone, Serialize)]
pub struct CollectedWebhook {
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub signature: String,
    pub timestamp: i64,
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    api_version: &'a str,
    created_at: String,
    data: &'a JsonValue,
}

// ============================================================================
// Delivery engine
// ============================================================================

pub struct WebhookDelivery {
    clock: Arc<VirtualClock>,
    transport: Arc<dyn WebhookTransport>,
    endpoints: NamespacedStore<WebhookEndpoint>,
    events: NamespacedStore<Event>,
    attempts: DashMap<String, Vec<DeliveryAttempt>>,
    collected: DashMap<String, Vec<CollectedWebhook>>,
    queues: DashMap<String, mpsc::UnboundedSender<Event>>,
    workers: DashMap<String, JoinHandle<()>>,
    default_mode: RwLock<DeliveryMode>,
    namespace_modes: DashMap<String, DeliveryMode>,
}

impl WebhookDelivery {
    pub fn new(
        clock: Arc<VirtualClock>,
        transport: Arc<dyn WebhookTransport>,
        default_mode: DeliveryMode,
    ) -> Self {
        Self {
            endpoints: NamespacedStore::new(Arc::clone(&clock)),
            events: NamespacedStore::new(Arc::clone(&clock)),
            clock,
            transport,
            attempts: DashMap::new(),
            collected: DashMap::new(),
            queues: DashMap::new(),
            workers: DashMap::new(),
            default_mode: RwLock::new(default_mode),
            namespace_modes: DashMap::new(),
        }
    }

    pub fn with_http(clock: Arc<VirtualClock>) -> Self {
        Self::new(clock, Arc::new(HttpTransport::new()), DeliveryMode::Async)
    }

    // ========================================================================
    // Mode configuration
    // ========================================================================

    pub fn set_default_mode(&self, mode: DeliveryMode) {
        *self.default_mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    pub fn set_namespace_mode(&self, namespace: &str, mode: DeliveryMode) {
        self.namespace_modes.insert(namespace.to_string(), mode);
    }

    pub fn mode_for(&self, namespace: &str) -> DeliveryMode {
        self.namespace_modes
            .get(namespace)
            .map(|m| *m)
            .unwrap_or_else(|| *self.default_mode.read().unwrap_or_else(|e| e.into_inner()))
    }

    // ========================================================================
    // Endpoint registry
    // ========================================================================

    pub fn register_endpoint(
        &self,
        namespace: &str,
        url: &str,
        enabled_events: Vec<String>,
    ) -> SimResult<WebhookEndpoint> {
        let endpoint = WebhookEndpoint::new(url, enabled_events, self.clock.now())?;
        self.endpoints.insert(namespace, endpoint)
    }

    pub fn register_endpoint_with_secret(
        &self,
        namespace: &str,
        url: &str,
        enabled_events: Vec<String>,
        secret: &str,
    ) -> SimResult<WebhookEndpoint> {
        let endpoint =
            WebhookEndpoint::with_secret(url, enabled_events, secret, self.clock.now())?;
        self.endpoints.insert(namespace, endpoint)
    }

    pub fn get_endpoint(&self, namespace: &str, id: &str) -> SimResult<WebhookEndpoint> {
        self.endpoints.get(namespace, id)
    }

    pub fn list_endpoints(&self, namespace: &str) -> Vec<WebhookEndpoint> {
        self.endpoints.list(namespace)
    }

    /// Change an endpoint's URL and/or event filters. `None` leaves the
    /// field as is.
    pub fn update_endpoint(
        &self,
        namespace: &str,
        id: &str,
        url: Option<&str>,
        enabled_events: Option<Vec<String>>,
    ) -> SimResult<WebhookEndpoint> {
        if let Some(url) = url {
            crate::domain::endpoint::validate_url(url)?;
        }
        if let Some(patterns) = &enabled_events {
            for pattern in patterns {
                crate::domain::endpoint::validate_pattern(pattern)?;
            }
        }
        self.endpoints.update(namespace, id, |ep| {
            if let Some(url) = url {
                ep.url = url.to_string();
            }
            if let Some(patterns) = enabled_events {
                ep.enabled_events = patterns;
            }
        })
    }

    pub fn disable_endpoint(&self, namespace: &str, id: &str) -> SimResult<WebhookEndpoint> {
        self.endpoints.update(namespace, id, |ep| {
            ep.status = crate::domain::EndpointStatus::Disabled;
        })
    }

    pub fn delete_endpoint(&self, namespace: &str, id: &str) -> SimResult<()> {
        self.endpoints.delete(namespace, id).map(|_| ())
    }

    // ========================================================================
    // Delivery entry points
    // ========================================================================

    /// Route an event according to its namespace's delivery mode. Async and
    /// sync namespaces enqueue onto the namespace worker (fire-and-forget
    /// from the caller's perspective); collect namespaces capture
    /// immediately.
    pub fn deliver(self: &Arc<Self>, event: Event) {
        self.record_event(&event);
        match self.mode_for(&event.namespace) {
            DeliveryMode::Collect => self.collect(&event),
            DeliveryMode::Async | DeliveryMode::Sync => {
                let queue = self.namespace_queue(&event.namespace);
                if queue.send(event).is_err() {
                    warn!("namespace delivery worker gone; event dropped");
                }
            }
        }
    }

    /// Deliver and block until every matching endpoint reaches a terminal
    /// state (delivered or exhausted), or `timeout` elapses.
    pub async fn deliver_sync(
        self: &Arc<Self>,
        event: Event,
        timeout: Duration,
    ) -> SimResult<Vec<DeliveryOutcome>> {
        self.record_event(&event);
        if self.mode_for(&event.namespace) == DeliveryMode::Collect {
            self.collect(&event);
            return Ok(Vec::new());
        }
        let engine = Arc::clone(self);
        tokio::time::timeout(timeout, async move { engine.deliver_event_now(&event).await })
            .await
            .map_err(|_| {
                SimulatorError::Internal(format!(
                    "sync webhook delivery timed out after {}ms",
                    timeout.as_millis()
                ))
            })
    }

    /// Consume the chaos coordinator's outbound channel.
    pub fn spawn_pump(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<Event>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                engine.deliver(event);
            }
        })
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn events(&self, namespace: &str) -> Vec<Event> {
        self.events.list(namespace)
    }

    pub fn attempts(&self, event_id: &str) -> Vec<DeliveryAttempt> {
        self.attempts
            .get(event_id)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Collected webhooks for a namespace, filtered by the same wildcard
    /// syntax endpoint subscriptions use.
    pub fn collected(&self, namespace: &str, pattern: &str) -> Vec<CollectedWebhook> {
        self.collected
            .get(namespace)
            .map(|hooks| {
                hooks
                    .iter()
                    .filter(|hook| event_type_matches(pattern, &hook.event_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear_collected(&self, namespace: &str) {
        self.collected.remove(namespace);
    }

    /// Namespace teardown: abort the worker (cancelling pending retries),
    /// then drop endpoints, the event log, attempt history, collected
    /// webhooks, and the mode override.
    pub fn clear_namespace(&self, namespace: &str) {
        self.queues.remove(namespace);
        if let Some((_, worker)) = self.workers.remove(namespace) {
            worker.abort();
        }
        for event in self.events.list(namespace) {
            self.attempts.remove(&event.id);
        }
        self.events.clear_namespace(namespace);
        self.endpoints.clear_namespace(namespace);
        self.collected.remove(namespace);
        self.namespace_modes.remove(namespace);
    }

    /// Abort every namespace worker. Workers hold an `Arc` back to this
    /// engine, so the owning simulator calls this on drop to break the cycle.
    pub fn shutdown(&self) {
        self.queues.clear();
        for entry in self.workers.iter() {
            entry.value().abort();
        }
        self.workers.clear();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn record_event(&self, event: &Event) {
        // Chaos duplication replays the same event id; the first record wins.
        let _ = self.events.insert(&event.namespace, event.clone());
    }

    // One worker per namespace keeps deliveries in enqueue order. The entry
    // guard makes worker creation exclusive under concurrent first sends.
    fn namespace_queue(self: &Arc<Self>, namespace: &str) -> mpsc::UnboundedSender<Event> {
        match self.queues.entry(namespace.to_string()) {
            Entry::Occupied(slot) => slot.get().clone(),
            Entry::Vacant(slot) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
                let engine = Arc::clone(self);
                let worker = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        engine.deliver_event_now(&event).await;
                    }
                });
                self.workers.insert(namespace.to_string(), worker);
                slot.insert(tx.clone());
                tx
            }
        }
    }

    fn collect(&self, event: &Event) {
        let body = envelope_body(event);
        let timestamp = self.clock.timestamp();
        let signature = sign_payload(DEFAULT_TEST_SECRET, timestamp, &body);
        self.collected
            .entry(event.namespace.clone())
            .or_default()
            .push(CollectedWebhook {
                event_id: event.id.clone(),
                event_type: event.event_type.as_str().to_string(),
                payload: body,
                signature,
                timestamp,
            });
        debug!(event_id = %event.id, event_type = %event.event_type, "webhook collected");
    }

    async fn deliver_event_now(&self, event: &Event) -> Vec<DeliveryOutcome> {
        let matching = self
            .endpoints
            .list_where(&event.namespace, |ep| {
                ep.matches_event(event.event_type.as_str())
            });
        let body = envelope_body(event);
        let mut outcomes = Vec::with_capacity(matching.len());
        for endpoint in matching {
            outcomes.push(self.attempt_delivery(event, &endpoint, &body).await);
        }
        outcomes
    }

    async fn attempt_delivery(
        &self,
        event: &Event,
        endpoint: &WebhookEndpoint,
        body: &str,
    ) -> DeliveryOutcome {
        for attempt_number in 1..=MAX_DELIVERY_ATTEMPTS {
            let timestamp = self.clock.timestamp();
            let headers = DeliveryHeaders {
                signature: sign_payload(&endpoint.secret, timestamp, body),
                event_id: event.id.clone(),
                timestamp,
            };
            let result = self.transport.post(&endpoint.url, &headers, body).await;

            let (response_status, error) = match result {
                Ok(status) if (200..300).contains(&status) => {
                    info!(
                        event_id = %event.id,
                        endpoint_id = %endpoint.id,
                        attempt = attempt_number,
                        "webhook delivered"
                    );
                    self.record_attempt(DeliveryAttempt {
                        event_id: event.id.clone(),
                        endpoint_id: endpoint.id.clone(),
                        attempt_number,
                        status: AttemptStatus::Delivered,
                        response_status: Some(status),
                        error: None,
                        next_retry_at: None,
                    });
                    return DeliveryOutcome {
                        endpoint_id: endpoint.id.clone(),
                        delivered: true,
                        attempts: attempt_number,
                    };
                }
                Ok(status) => (Some(status), None),
                Err(e) => (None, Some(e)),
            };

            if attempt_number == MAX_DELIVERY_ATTEMPTS {
                let exhausted = SimulatorError::DeliveryExhausted {
                    attempts: attempt_number,
                };
                error!(
                    event_id = %event.id,
                    endpoint_id = %endpoint.id,
                    response_status = ?response_status,
                    error = %exhausted,
                    "webhook delivery abandoned"
                );
                self.record_attempt(DeliveryAttempt {
                    event_id: event.id.clone(),
                    endpoint_id: endpoint.id.clone(),
                    attempt_number,
                    status: AttemptStatus::Exhausted,
                    response_status,
                    error,
                    next_retry_at: None,
                });
                return DeliveryOutcome {
                    endpoint_id: endpoint.id.clone(),
                    delivered: false,
                    attempts: attempt_number,
                };
            }

            let delay = backoff_delay(attempt_number);
            warn!(
                event_id = %event.id,
                endpoint_id = %endpoint.id,
                attempt = attempt_number,
                response_status = ?response_status,
                retry_in_ms = delay.as_millis() as u64,
                "webhook delivery failed; retrying"
            );
            self.record_attempt(DeliveryAttempt {
                event_id: event.id.clone(),
                endpoint_id: endpoint.id.clone(),
                attempt_number,
                status: AttemptStatus::Retrying,
                response_status,
                error,
                next_retry_at: Some(
                    self.clock.now() + chrono::Duration::milliseconds(delay.as_millis() as i64),
                ),
            });
            tokio::time::sleep(delay).await;
        }
        unreachable!("retry loop always returns at the attempt cap")
    }

    fn record_attempt(&self, attempt: DeliveryAttempt) {
        self.attempts
            .entry(attempt.event_id.clone())
            .or_default()
            .push(attempt);
    }
}

fn envelope_body(event: &Event) -> String {
    let envelope = WebhookEnvelope {
        id: &event.id,
        event_type: event.event_type.as_str(),
        api_version: API_VERSION,
        created_at: event.created_at.to_rfc3339(),
        data: &event.payload,
    };
    serde_json::to_string(&envelope).unwrap_or_else(|e| {
        error!(event_id = %event.id, error = %e, "failed to serialize webhook envelope");
        "{}".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use chrono::TimeZone;

    #[test]
    fn backoff_is_strictly_increasing_until_the_cap() {
        let d1 = backoff_delay(1);
        let d2 = backoff_delay(2);
        let d3 = backoff_delay(3);
        let d4 = backoff_delay(4);
        assert!(d1 < d2 && d2 < d3 && d3 < d4);
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d4, Duration::from_millis(5_000));
        assert_eq!(backoff_delay(10), Duration::from_millis(5_000));
    }

    #[test]
    fn envelope_renames_event_type_to_type() {
        let event = Event::new(
            "ns",
            EventType::InvoicePaid,
            serde_json::json!({"invoice_id": "in_1"}),
            Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
        );
        let body: JsonValue = serde_json::from_str(&envelope_body(&event)).unwrap();
        assert_eq!(body["type"], "invoice.paid");
        assert!(body.get("event_type").is_none());
        assert_eq!(body["api_version"], API_VERSION);
        assert_eq!(body["data"]["invoice_id"], "in_1");
    }

    #[tokio::test]
    async fn collect_mode_captures_instead_of_sending() {
        let clock = Arc::new(VirtualClock::manual(
            Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
        ));
        let delivery = Arc::new(WebhookDelivery::new(
            Arc::clone(&clock),
            Arc::new(HttpTransport::new()),
            DeliveryMode::Collect,
        ));
        let event = Event::new(
            "ns",
            EventType::InvoicePaid,
            serde_json::json!({"amount": 2000}),
            clock.now(),
        );
        delivery.deliver(event);

        let all = delivery.collected("ns", "*");
        assert_eq!(all.len(), 1);
        assert!(verify_signature(
            DEFAULT_TEST_SECRET,
            &all[0].signature,
            &all[0].payload
        ));
        assert_eq!(delivery.collected("ns", "invoice.*").len(), 1);
        assert_eq!(delivery.collected("ns", "customer.*").len(), 0);

        delivery.clear_collected("ns");
        assert!(delivery.collected("ns", "*").is_empty());
    }

    #[tokio::test]
    async fn mode_overrides_are_per_namespace() {
        let clock = Arc::new(VirtualClock::new());
        let delivery = Arc::new(WebhookDelivery::new(
            clock,
            Arc::new(HttpTransport::new()),
            DeliveryMode::Async,
        ));
        delivery.set_namespace_mode("collected", DeliveryMode::Collect);
        assert_eq!(delivery.mode_for("collected"), DeliveryMode::Collect);
        assert_eq!(delivery.mode_for("other"), DeliveryMode::Async);
        delivery.set_default_mode(DeliveryMode::Sync);
        assert_eq!(delivery.mode_for("other"), DeliveryMode::Sync);
        assert_eq!(delivery.mode_for("collected"), DeliveryMode::Collect);
    }
}
