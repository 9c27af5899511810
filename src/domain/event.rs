use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::new_id;
use crate::store::Resource;

/// Closed set of event types the simulator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    CustomerCreated,
    CustomerUpdated,
    CustomerDeleted,
    CustomerSubscriptionCreated,
    CustomerSubscriptionUpdated,
    CustomerSubscriptionDeleted,
    InvoiceCreated,
    InvoiceFinalized,
    InvoicePaid,
    InvoicePaymentFailed,
    ChargeSucceeded,
    ChargeFailed,
    WebhookTest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerCreated => "customer.created",
            Self::CustomerUpdated => "customer.updated",
            Self::CustomerDeleted => "customer.deleted",
            Self::CustomerSubscriptionCreated => "customer.subscription.created",
            Self::CustomerSubscriptionUpdated => "customer.subscription.updated",
            Self::CustomerSubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoiceCreated => "invoice.created",
            Self::InvoiceFinalized => "invoice.finalized",
            Self::InvoicePaid => "invoice.paid",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::ChargeSucceeded => "charge.succeeded",
            Self::ChargeFailed => "charge.failed",
            Self::WebhookTest => "webhook.test",
        }
    }

    pub fn all_types() -> &'static [EventType] {
        &[
            Self::CustomerCreated,
            Self::CustomerUpdated,
            Self::CustomerDeleted,
            Self::CustomerSubscriptionCreated,
            Self::CustomerSubscriptionUpdated,
            Self::CustomerSubscriptionDeleted,
            Self::InvoiceCreated,
            Self::InvoiceFinalized,
            Self::InvoicePaid,
            Self::InvoicePaymentFailed,
            Self::ChargeSucceeded,
            Self::ChargeFailed,
            Self::WebhookTest,
        ]
    }

    pub fn all_type_strings() -> Vec<&'static str> {
        Self::all_types().iter().map(|t| t.as_str()).collect()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer.created" => Ok(Self::CustomerCreated),
            "customer.updated" => Ok(Self::CustomerUpdated),
            "customer.deleted" => Ok(Self::CustomerDeleted),
            "customer.subscription.created" => Ok(Self::CustomerSubscriptionCreated),
            "customer.subscription.updated" => Ok(Self::CustomerSubscriptionUpdated),
            "customer.subscription.deleted" => Ok(Self::CustomerSubscriptionDeleted),
            "invoice.created" => Ok(Self::InvoiceCreated),
            "invoice.finalized" => Ok(Self::InvoiceFinalized),
            "invoice.paid" => Ok(Self::InvoicePaid),
            "invoice.payment_failed" => Ok(Self::InvoicePaymentFailed),
            "charge.succeeded" => Ok(Self::ChargeSucceeded),
            "charge.failed" => Ok(Self::ChargeFailed),
            "webhook.test" => Ok(Self::WebhookTest),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

/// Subscription filter match: exact, trailing-wildcard prefix
/// (`"invoice.*"`), or the catch-all `"*"`.
pub fn event_type_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type == prefix
            || event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'));
    }
    pattern == event_type
}

/// Immutable record of something that happened in the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub namespace: String,
    pub event_type: EventType,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        namespace: &str,
        event_type: EventType,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("evt"),
            namespace: namespace.to_string(),
            event_type,
            payload,
            created_at: now,
        }
    }
}

impl Resource for Event {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    // Events are immutable once recorded.
    fn touch(&mut self, _now: DateTime<Utc>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_roundtrips_through_from_str() {
        for event_type in EventType::all_types() {
            let parsed: EventType = event_type.as_str().parse().unwrap();
            assert_eq!(*event_type, parsed);
        }
    }

    #[test]
    fn from_str_rejects_unknown() {
        assert!("unknown.event".parse::<EventType>().is_err());
    }

    #[test]
    fn all_types_is_exhaustive() {
        assert_eq!(EventType::all_types().len(), 13);
    }

    #[test]
    fn exact_match() {
        assert!(event_type_matches("invoice.paid", "invoice.paid"));
        assert!(!event_type_matches("invoice.paid", "invoice.created"));
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(event_type_matches("*", "invoice.paid"));
        assert!(event_type_matches("*", "customer.subscription.created"));
    }

    #[test]
    fn prefix_wildcard_matches_segment_boundaries() {
        assert!(event_type_matches("invoice.*", "invoice.paid"));
        assert!(event_type_matches(
            "customer.*",
            "customer.subscription.created"
        ));
        assert!(event_type_matches(
            "customer.subscription.*",
            "customer.subscription.deleted"
        ));
        // "invoice.*" must not match "invoices.created".
        assert!(!event_type_matches("invoice.*", "invoices.created"));
        assert!(!event_type_matches("customer.*", "invoice.paid"));
    }
}
