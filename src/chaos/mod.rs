//! Unified chaos-injection coordinator.
//!
//! One owner per process holds per-namespace fault configuration for the
//! three layers the simulator can perturb: payment outcomes (decline codes),
//! event delivery (buffering, duplication, reordering), and the API surface
//! (timeouts, rate limits, server errors). Tests read back [`ChaosStats`] to
//! assert that configured chaos actually fired.

pub mod decline;

pub use decline::DeclineCode;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::Event;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    pub payment: PaymentChaos,
    /// `None` disables event chaos entirely; events pass straight through.
    pub event: Option<EventChaos>,
    pub api: ApiChaos,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentChaos {
    /// Probability in `[0, 1]` that a payment is declined.
    pub failure_rate: f64,
    /// Relative weights for decline-code selection. Empty means uniform
    /// across all 22 codes.
    pub decline_weights: Vec<(DeclineCode, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventChaos {
    /// Shuffle each flushed buffer before forwarding.
    pub out_of_order: bool,
    /// Probability that a queued event produces two delivery requests.
    pub duplicate_rate: f64,
    /// How long a namespace buffer stays open after its first event.
    pub buffer_window_ms: u64,
}

impl Default for EventChaos {
    fn default() -> Self {
        Self {
            out_of_order: false,
            duplicate_rate: 0.0,
            buffer_window_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiChaos {
    pub timeout_rate: f64,
    /// Injected timeout duration reported to the transport layer.
    pub timeout_ms: u64,
    pub rate_limit_rate: f64,
    pub error_rate: f64,
    /// Per-path faults; these win over the probabilistic rates.
    pub endpoint_overrides: HashMap<String, ApiFault>,
}

impl Default for ApiChaos {
    fn default() -> Self {
        Self {
            timeout_rate: 0.0,
            timeout_ms: 5_000,
            rate_limit_rate: 0.0,
            error_rate: 0.0,
            endpoint_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFault {
    Timeout,
    RateLimit,
    ServerError,
}

// ============================================================================
// Decisions & stats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDecision {
    Approve,
    Decline(DeclineCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDecision {
    Proceed,
    Timeout { ms: u64 },
    RateLimited,
    ServerError,
}

/// Running counters of injected chaos, per namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChaosStats {
    pub payments_declined: u64,
    pub events_buffered: u64,
    pub events_duplicated: u64,
    pub events_reordered: u64,
    pub api_timeouts: u64,
    pub api_rate_limits: u64,
    pub api_server_errors: u64,
}

struct EventBuffer {
    events: Vec<Event>,
    flush_task: Option<JoinHandle<()>>,
}

impl EventBuffer {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            flush_task: None,
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct ChaosCoordinator {
    configs: DashMap<String, ChaosConfig>,
    /// Per-customer deterministic decline overrides; these always win.
    overrides: DashMap<(String, String), DeclineCode>,
    stats: DashMap<String, ChaosStats>,
    buffers: DashMap<String, EventBuffer>,
    /// Delivery requests flow out of here into webhook delivery.
    outbound: mpsc::UnboundedSender<Event>,
    rng: Mutex<StdRng>,
}

impl ChaosCoordinator {
    pub fn new(outbound: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            configs: DashMap::new(),
            overrides: DashMap::new(),
            stats: DashMap::new(),
            buffers: DashMap::new(),
            outbound,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded RNG for reproducible chaos runs.
    pub fn with_seed(outbound: mpsc::UnboundedSender<Event>, seed: u64) -> Self {
        let coordinator = Self::new(outbound);
        *coordinator.rng.lock().unwrap_or_else(|e| e.into_inner()) = StdRng::seed_from_u64(seed);
        coordinator
    }

    pub fn configure(&self, namespace: &str, config: ChaosConfig) {
        debug!(namespace, "chaos configured");
        self.configs.insert(namespace.to_string(), config);
    }

    pub fn get_config(&self, namespace: &str) -> ChaosConfig {
        self.configs
            .get(namespace)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Wipe the namespace's chaos state: config, overrides, stats, and any
    /// open event buffer (its flush timer is cancelled, buffered events are
    /// dropped so nothing fires after test teardown).
    pub fn reset(&self, namespace: &str) {
        self.configs.remove(namespace);
        self.overrides.retain(|key, _| key.0 != namespace);
        self.stats.remove(namespace);
        if let Some((_, buffer)) = self.buffers.remove(namespace) {
            if let Some(task) = buffer.flush_task {
                task.abort();
            }
            if !buffer.events.is_empty() {
                debug!(
                    namespace,
                    dropped = buffer.events.len(),
                    "dropped buffered events on chaos reset"
                );
            }
        }
    }

    pub fn stats(&self, namespace: &str) -> ChaosStats {
        self.stats
            .get(namespace)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // Payment chaos
    // ========================================================================

    /// Force every payment for `customer_id` to decline with `code`.
    pub fn simulate_failure(&self, namespace: &str, customer_id: &str, code: DeclineCode) {
        self.overrides
            .insert((namespace.to_string(), customer_id.to_string()), code);
    }

    pub fn clear_simulation(&self, namespace: &str, customer_id: &str) {
        self.overrides
            .remove(&(namespace.to_string(), customer_id.to_string()));
    }

    /// Decision order: per-customer override, then the configured failure
    /// rate, then weighted (or uniform) decline-code selection.
    pub fn should_payment_fail(&self, namespace: &str, customer_id: &str) -> PaymentDecision {
        if let Some(code) = self
            .overrides
            .get(&(namespace.to_string(), customer_id.to_string()))
        {
            let code = *code;
            self.bump(namespace, |s| s.payments_declined += 1);
            return PaymentDecision::Decline(code);
        }

        let payment = self
            .configs
            .get(namespace)
            .map(|c| c.payment.clone())
            .unwrap_or_default();
        if payment.failure_rate <= 0.0 || self.draw() >= payment.failure_rate {
            return PaymentDecision::Approve;
        }

        let code = self.pick_decline_code(&payment.decline_weights);
        self.bump(namespace, |s| s.payments_declined += 1);
        PaymentDecision::Decline(code)
    }

    fn pick_decline_code(&self, weights: &[(DeclineCode, f64)]) -> DeclineCode {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let positive: Vec<(DeclineCode, f64)> = weights
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .copied()
            .collect();
        if positive.is_empty() {
            let all = DeclineCode::all();
            return all[rng.gen_range(0..all.len())];
        }
        let total: f64 = positive.iter().map(|(_, w)| w).sum();
        let mut roll = rng.gen_range(0.0..1.0) * total;
        for (code, weight) in &positive {
            roll -= weight;
            if roll <= 0.0 {
                return *code;
            }
        }
        positive[positive.len() - 1].0
    }

    // ========================================================================
    // Event chaos
    // ========================================================================

    /// Route an event toward webhook delivery, applying any configured event
    /// chaos. Without event chaos this is an immediate forward.
    pub fn queue_event(self: &Arc<Self>, event: Event) {
        let namespace = event.namespace.clone();
        let Some(event_chaos) = self
            .configs
            .get(&namespace)
            .and_then(|c| c.event.clone())
        else {
            self.forward(event);
            return;
        };

        let duplicate =
            event_chaos.duplicate_rate > 0.0 && self.draw() < event_chaos.duplicate_rate;

        let opened_buffer = !self.buffers.contains_key(&namespace);
        {
            let mut buffer = self
                .buffers
                .entry(namespace.clone())
                .or_insert_with(EventBuffer::new);
            buffer.events.push(event.clone());
            self.bump(&namespace, |s| s.events_buffered += 1);
            if duplicate {
                buffer.events.push(event);
                self.bump(&namespace, |s| {
                    s.events_buffered += 1;
                    s.events_duplicated += 1;
                });
            }
        }

        if opened_buffer {
            let coordinator = Arc::clone(self);
            let ns = namespace.clone();
            let window = Duration::from_millis(event_chaos.buffer_window_ms);
            let task = tokio::spawn(async move {
                tokio::time::sleep(window).await;
                coordinator.flush_buffer(&ns);
            });
            if let Some(mut buffer) = self.buffers.get_mut(&namespace) {
                buffer.flush_task = Some(task);
            }
        }
    }

    fn flush_buffer(&self, namespace: &str) {
        let Some((_, buffer)) = self.buffers.remove(namespace) else {
            return;
        };
        let mut events = buffer.events;
        let out_of_order = self
            .configs
            .get(namespace)
            .and_then(|c| c.event.as_ref().map(|e| e.out_of_order))
            .unwrap_or(false);
        if out_of_order && events.len() > 1 {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            events.shuffle(&mut *rng);
            let count = events.len() as u64;
            drop(rng);
            self.bump(namespace, |s| s.events_reordered += count);
        }
        debug!(namespace, count = events.len(), "flushing event buffer");
        for event in events {
            self.forward(event);
        }
    }

    fn forward(&self, event: Event) {
        if self.outbound.send(event).is_err() {
            warn!("event delivery channel closed; dropping event");
        }
    }

    // ========================================================================
    // API chaos
    // ========================================================================

    /// Should the next API call against `path` be failed artificially?
    pub fn should_api_fail(&self, namespace: &str, path: &str) -> ApiDecision {
        let api = self
            .configs
            .get(namespace)
            .map(|c| c.api.clone())
            .unwrap_or_default();

        if let Some(fault) = api.endpoint_overrides.get(path) {
            return self.record_api_decision(namespace, *fault, api.timeout_ms);
        }

        if api.timeout_rate > 0.0 && self.draw() < api.timeout_rate {
            return self.record_api_decision(namespace, ApiFault::Timeout, api.timeout_ms);
        }
        if api.rate_limit_rate > 0.0 && self.draw() < api.rate_limit_rate {
            return self.record_api_decision(namespace, ApiFault::RateLimit, api.timeout_ms);
        }
        if api.error_rate > 0.0 && self.draw() < api.error_rate {
            return self.record_api_decision(namespace, ApiFault::ServerError, api.timeout_ms);
        }
        ApiDecision::Proceed
    }

    fn record_api_decision(&self, namespace: &str, fault: ApiFault, timeout_ms: u64) -> ApiDecision {
        match fault {
            ApiFault::Timeout => {
                self.bump(namespace, |s| s.api_timeouts += 1);
                ApiDecision::Timeout { ms: timeout_ms }
            }
            ApiFault::RateLimit => {
                self.bump(namespace, |s| s.api_rate_limits += 1);
                ApiDecision::RateLimited
            }
            ApiFault::ServerError => {
                self.bump(namespace, |s| s.api_server_errors += 1);
                ApiDecision::ServerError
            }
        }
    }

    fn bump(&self, namespace: &str, update: impl FnOnce(&mut ChaosStats)) {
        let mut stats = self.stats.entry(namespace.to_string()).or_default();
        update(&mut stats);
    }

    fn draw(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(0.0..1.0)
    }
}
