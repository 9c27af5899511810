//! In-process payment platform simulator for integration test suites.
//!
//! Instead of mocking individual API calls, tests get a stateful simulated
//! platform: a virtual clock, namespaced resource stores, idempotency-key
//! caching, configurable failure injection, signed webhook delivery with
//! retries, and a subscription billing engine. One simulator serves many
//! tests concurrently; each test works inside its own namespace and tears
//! it down when finished.

pub mod billing;
pub mod chaos;
pub mod clock;
pub mod domain;
pub mod error;
pub mod idempotency;
pub mod simulator;
pub mod store;
pub mod webhook;

// Re-exports for shorter use statements.
pub use billing::{BillingEngine, BillingRunSummary, PAST_DUE_THRESHOLD};
pub use chaos::{
    ApiChaos, ApiDecision, ApiFault, ChaosConfig, ChaosCoordinator, ChaosStats, DeclineCode,
    EventChaos, PaymentChaos, PaymentDecision,
};
pub use clock::{ClockMode, VirtualClock};
pub use domain::*;
pub use error::{SimResult, SimulatorError};
pub use idempotency::{CachedResponse, Claim, ConflictReason, IdempotencyCache};
pub use simulator::{PaymentSimulator, SimulatorConfig};
pub use store::{NamespacedStore, Resource, GLOBAL_NAMESPACE};
pub use webhook::{
    sign_payload, verify_signature, AttemptStatus, CollectedWebhook, DeliveryAttempt,
    DeliveryHeaders, DeliveryMode, DeliveryOutcome, WebhookDelivery, WebhookTransport,
    API_VERSION, DEFAULT_TEST_SECRET, MAX_DELIVERY_ATTEMPTS,
};
