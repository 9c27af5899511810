//! Top-level wiring for the simulator.
//!
//! `PaymentSimulator` owns one instance of every component, shares a single
//! virtual clock between them, and connects the chaos coordinator's event
//! output to the webhook delivery engine. Test suites normally build one
//! simulator per process and hand each test its own namespace.
//!
//! Construction must happen inside a tokio runtime; the event pump and the
//! per-namespace delivery workers are spawned tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::billing::BillingEngine;
use crate::chaos::ChaosCoordinator;
use crate::clock::VirtualClock;
use crate::domain::{BalanceTransaction, Event, EventType, Invoice, Subscription};
use crate::idempotency::IdempotencyCache;
use crate::store::NamespacedStore;
use crate::webhook::{DeliveryMode, WebhookDelivery, WebhookTransport};

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Delivery mode applied to namespaces without an explicit override.
    pub delivery_mode: DeliveryMode,
    /// When set, the clock starts frozen at this instant in manual mode.
    /// Otherwise it tracks the host clock.
    pub start_time: Option<DateTime<Utc>>,
    /// Seeds the chaos RNG for reproducible failure sequences.
    pub chaos_seed: Option<u64>,
    /// Upper bound on a single synchronous delivery, retries included.
    pub sync_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Async,
            start_time: None,
            chaos_seed: None,
            sync_timeout: Duration::from_secs(30),
        }
    }
}

pub struct PaymentSimulator {
    clock: Arc<VirtualClock>,
    subscriptions: Arc<NamespacedStore<Subscription>>,
    invoices: Arc<NamespacedStore<Invoice>>,
    transactions: Arc<NamespacedStore<BalanceTransaction>>,
    idempotency: Arc<IdempotencyCache>,
    chaos: Arc<ChaosCoordinator>,
    webhooks: Arc<WebhookDelivery>,
    billing: BillingEngine,
    sync_timeout: Duration,
    pump: JoinHandle<()>,
}

impl PaymentSimulator {
    /// Build a simulator delivering webhooks over real HTTP.
    pub fn new(config: SimulatorConfig) -> Self {
        let clock = Self::build_clock(&config);
        let webhooks = Arc::new(WebhookDelivery::with_http(Arc::clone(&clock)));
        Self::wire(config, clock, webhooks)
    }

    /// Build a simulator with an injected transport. Tests use this to
    /// script endpoint responses without a listening server.
    pub fn with_transport(config: SimulatorConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        let clock = Self::build_clock(&config);
        let webhooks = Arc::new(WebhookDelivery::new(
            Arc::clone(&clock),
            transport,
            config.delivery_mode,
        ));
        Self::wire(config, clock, webhooks)
    }

    fn build_clock(config: &SimulatorConfig) -> Arc<VirtualClock> {
        Arc::new(match config.start_time {
            Some(initial) => VirtualClock::manual(initial),
            None => VirtualClock::new(),
        })
    }

    fn wire(
        config: SimulatorConfig,
        clock: Arc<VirtualClock>,
        webhooks: Arc<WebhookDelivery>,
    ) -> Self {
        webhooks.set_default_mode(config.delivery_mode);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let chaos = Arc::new(match config.chaos_seed {
            Some(seed) => ChaosCoordinator::with_seed(event_tx, seed),
            None => ChaosCoordinator::new(event_tx),
        });
        let pump = webhooks.spawn_pump(event_rx);

        let subscriptions = Arc::new(NamespacedStore::new(Arc::clone(&clock)));
        let invoices = Arc::new(NamespacedStore::new(Arc::clone(&clock)));
        let transactions = Arc::new(NamespacedStore::new(Arc::clone(&clock)));
        let idempotency = Arc::new(IdempotencyCache::new(Arc::clone(&clock)));
        let billing = BillingEngine::new(
            Arc::clone(&subscriptions),
            Arc::clone(&invoices),
            Arc::clone(&transactions),
            Arc::clone(&clock),
            Arc::clone(&chaos),
        );

        Self {
            clock,
            subscriptions,
            invoices,
            transactions,
            idempotency,
            chaos,
            webhooks,
            billing,
            sync_timeout: config.sync_timeout,
            pump,
        }
    }

    // ========================================================================
    // Component access
    // ========================================================================

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn subscriptions(&self) -> &Arc<NamespacedStore<Subscription>> {
        &self.subscriptions
    }

    pub fn invoices(&self) -> &Arc<NamespacedStore<Invoice>> {
        &self.invoices
    }

    pub fn transactions(&self) -> &Arc<NamespacedStore<BalanceTransaction>> {
        &self.transactions
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyCache> {
        &self.idempotency
    }

    pub fn chaos(&self) -> &Arc<ChaosCoordinator> {
        &self.chaos
    }

    pub fn webhooks(&self) -> &Arc<WebhookDelivery> {
        &self.webhooks
    }

    pub fn billing(&self) -> &BillingEngine {
        &self.billing
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    // ========================================================================
    // Event boundary
    // ========================================================================

    /// Inject an event at the chaos boundary, exactly as the billing engine
    /// does. The event passes through any configured reordering or
    /// duplication before delivery.
    pub fn emit(&self, namespace: &str, event_type: EventType, payload: JsonValue) {
        let event = Event::new(namespace, event_type, payload, self.clock.now());
        self.chaos.queue_event(event);
    }

    /// Drop every trace of a namespace across all components. Queued and
    /// in-retry deliveries for the namespace are cancelled, not flushed.
    pub fn teardown_namespace(&self, namespace: &str) {
        self.chaos.reset(namespace);
        self.webhooks.clear_namespace(namespace);
        self.subscriptions.clear_namespace(namespace);
        self.invoices.clear_namespace(namespace);
        self.transactions.clear_namespace(namespace);
        self.idempotency.clear_namespace(namespace);
        info!(namespace, "namespace torn down");
    }
}

impl Drop for PaymentSimulator {
    fn drop(&mut self) {
        self.pump.abort();
        self.webhooks.shutdown();
    }
}
