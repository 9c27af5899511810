pub mod endpoint;
pub mod event;
pub mod invoice;
pub mod subscription;
pub mod transaction;

pub use endpoint::{EndpointStatus, WebhookEndpoint};
pub use event::{Event, EventType, event_type_matches};
pub use invoice::{Invoice, InvoiceStatus, LineItem};
pub use subscription::{PlanInterval, Subscription, SubscriptionStatus};
pub use transaction::{BalanceTransaction, TransactionKind};

use uuid::Uuid;

/// Prefixed opaque id in the provider's style (`sub_…`, `in_…`, `evt_…`).
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
