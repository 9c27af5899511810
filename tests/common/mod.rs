#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use paymock::{
    DeliveryHeaders, DeliveryMode, PaymentSimulator, PlanInterval, SimulatorConfig, Subscription,
    WebhookTransport,
};

/// Opt-in log output when debugging a failing test; run with
/// `RUST_LOG=paymock=debug`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixed, documented instant every frozen-clock test starts from.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn frozen_config(delivery_mode: DeliveryMode) -> SimulatorConfig {
    init_tracing();
    SimulatorConfig {
        delivery_mode,
        start_time: Some(epoch()),
        chaos_seed: Some(42),
        sync_timeout: Duration::from_secs(30),
    }
}

/// Simulator with a frozen clock, seeded chaos, and a scripted transport.
pub fn simulator_with(
    delivery_mode: DeliveryMode,
    transport: Arc<dyn WebhookTransport>,
) -> PaymentSimulator {
    PaymentSimulator::with_transport(frozen_config(delivery_mode), transport)
}

/// Simulator capturing webhooks instead of posting them.
pub fn collecting_simulator() -> PaymentSimulator {
    PaymentSimulator::new(frozen_config(DeliveryMode::Collect))
}

/// A $20/month subscription registered through the billing engine, so the
/// creation event fires like it would in production use.
pub fn monthly_subscription(
    sim: &PaymentSimulator,
    namespace: &str,
    customer_id: &str,
) -> Subscription {
    let sub = Subscription::new(
        customer_id,
        "price_pro_monthly",
        2000,
        "usd",
        PlanInterval::Month,
        1,
        sim.clock().now(),
    )
    .expect("valid subscription");
    sim.billing()
        .create_subscription(namespace, sub)
        .expect("insert subscription")
}

/// Let spawned pump and delivery workers drain. Instant under paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// Like `settle`, but long enough to outlast the full retry backoff
/// schedule of a failing delivery.
pub async fn settle_retries() {
    tokio::time::sleep(Duration::from_secs(10)).await;
}

// ============================================================================
// Scripted transports
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub signature: String,
    pub event_id: String,
    pub timestamp: i64,
    pub body: String,
}

/// Accepts everything with a 200 and keeps a log of requests.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(
        &self,
        url: &str,
        headers: &DeliveryHeaders,
        body: &str,
    ) -> Result<u16, String> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            signature: headers.signature.clone(),
            event_id: headers.event_id.clone(),
            timestamp: headers.timestamp,
            body: body.to_string(),
        });
        Ok(200)
    }
}

/// Returns 500 for the first `fail_first` posts, then 200.
pub struct FlakyTransport {
    fail_first: u32,
    calls: AtomicU32,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FlakyTransport {
    pub fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookTransport for FlakyTransport {
    async fn post(
        &self,
        url: &str,
        headers: &DeliveryHeaders,
        body: &str,
    ) -> Result<u16, String> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            signature: headers.signature.clone(),
            event_id: headers.event_id.clone(),
            timestamp: headers.timestamp,
            body: body.to_string(),
        });
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Ok(500)
        } else {
            Ok(200)
        }
    }
}

/// Every post fails at the transport layer, as an unreachable host would.
#[derive(Default)]
pub struct UnreachableTransport {
    calls: AtomicU32,
}

impl UnreachableTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookTransport for UnreachableTransport {
    async fn post(
        &self,
        _url: &str,
        _headers: &DeliveryHeaders,
        _body: &str,
    ) -> Result<u16, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("connection refused".to_string())
    }
}
