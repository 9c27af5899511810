//! Subscription billing-cycle simulator.
//!
//! `process_billing` scans a namespace for subscriptions whose current
//! period has ended and walks each through invoice creation, a chaos-driven
//! payment decision, and the status state machine. Each subscription is
//! processed independently; one failure never aborts the batch. The core
//! invariant: one non-void invoice per `(subscription, period)` pair, so
//! re-running a billing cycle can never double-bill.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use crate::chaos::{ChaosCoordinator, DeclineCode, PaymentDecision};
use crate::clock::VirtualClock;
use crate::domain::{
    BalanceTransaction, Event, EventType, Invoice, InvoiceStatus, Subscription,
    SubscriptionStatus,
};
use crate::error::{SimResult, SimulatorError};
use crate::store::NamespacedStore;

/// A subscription goes `past_due` on its Nth consecutive failed attempt.
pub const PAST_DUE_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BillingRunSummary {
    /// Subscriptions that were due and examined.
    pub processed: u32,
    /// Payments that settled.
    pub succeeded: u32,
    /// Payments declined or subscriptions that errored.
    pub failed: u32,
}

pub struct BillingEngine {
    subscriptions: Arc<NamespacedStore<Subscription>>,
    invoices: Arc<NamespacedStore<Invoice>>,
    transactions: Arc<NamespacedStore<BalanceTransaction>>,
    clock: Arc<VirtualClock>,
    chaos: Arc<ChaosCoordinator>,
}

impl BillingEngine {
    pub fn new(
        subscriptions: Arc<NamespacedStore<Subscription>>,
        invoices: Arc<NamespacedStore<Invoice>>,
        transactions: Arc<NamespacedStore<BalanceTransaction>>,
        clock: Arc<VirtualClock>,
        chaos: Arc<ChaosCoordinator>,
    ) -> Self {
        Self {
            subscriptions,
            invoices,
            transactions,
            clock,
            chaos,
        }
    }

    /// Register a subscription and announce it.
    pub fn create_subscription(
        &self,
        namespace: &str,
        subscription: Subscription,
    ) -> SimResult<Subscription> {
        let stored = self.subscriptions.insert(namespace, subscription)?;
        self.emit(
            namespace,
            EventType::CustomerSubscriptionCreated,
            to_payload(&stored),
        );
        Ok(stored)
    }

    /// Run one billing pass over every due subscription in the namespace.
    pub fn process_billing(&self, namespace: &str) -> BillingRunSummary {
        let now = self.clock.now();
        let due = self.subscriptions.list_where(namespace, |s| s.is_due(now));

        let mut summary = BillingRunSummary::default();
        for subscription in due {
            summary.processed += 1;
            match self.bill_subscription(namespace, &subscription.id) {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "billing pass failed for subscription"
                    );
                    summary.failed += 1;
                }
            }
        }
        info!(
            namespace,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "billing pass complete"
        );
        summary
    }

    /// Explicit cancellation; valid from any non-terminal status.
    pub fn cancel_subscription(&self, namespace: &str, id: &str) -> SimResult<Subscription> {
        let subscription = self.subscriptions.get(namespace, id)?;
        if !subscription
            .status
            .can_transition_to(SubscriptionStatus::Canceled)
        {
            return Err(SimulatorError::Conflict(format!(
                "subscription {id} is already canceled"
            )));
        }
        let now = self.clock.now();
        let canceled = self.subscriptions.update(namespace, id, |sub| {
            sub.status = SubscriptionStatus::Canceled;
            sub.canceled_at = Some(now);
        })?;
        self.emit(
            namespace,
            EventType::CustomerSubscriptionDeleted,
            to_payload(&canceled),
        );
        Ok(canceled)
    }

    /// Pass-through to the chaos coordinator's per-customer override.
    pub fn simulate_failure(&self, namespace: &str, customer_id: &str, code: DeclineCode) {
        self.chaos.simulate_failure(namespace, customer_id, code);
    }

    pub fn clear_simulation(&self, namespace: &str, customer_id: &str) {
        self.chaos.clear_simulation(namespace, customer_id);
    }

    // ========================================================================
    // Single-subscription cycle
    // ========================================================================

    /// Returns `Ok(true)` when the period's payment settled (or had already
    /// settled), `Ok(false)` on a decline.
    fn bill_subscription(&self, namespace: &str, subscription_id: &str) -> SimResult<bool> {
        let mut subscription = self.subscriptions.get(namespace, subscription_id)?;

        // Trial end passed: the subscription converts before its first bill.
        if subscription.status == SubscriptionStatus::Trialing {
            subscription = self.subscriptions.update(namespace, subscription_id, |sub| {
                sub.status = SubscriptionStatus::Active;
            })?;
            self.emit(
                namespace,
                EventType::CustomerSubscriptionUpdated,
                to_payload(&subscription),
            );
        }

        let invoice = match self.invoices.find(namespace, |inv| {
            inv.covers(subscription_id, subscription.current_period_start)
        }) {
            // A concurrent run already settled this period; just roll forward.
            Some(existing) if existing.status == InvoiceStatus::Paid => {
                self.advance_after_payment(namespace, subscription_id)?;
                return Ok(true);
            }
            // Open (or draft) invoice from an earlier failed attempt: reuse.
            Some(existing) => existing,
            None => self.open_invoice(namespace, &subscription)?,
        };

        match self
            .chaos
            .should_payment_fail(namespace, &subscription.customer_id)
        {
            PaymentDecision::Approve => {
                self.settle_invoice(namespace, &subscription, &invoice)?;
                Ok(true)
            }
            PaymentDecision::Decline(code) => {
                self.record_decline(namespace, &subscription, &invoice, code)?;
                Ok(false)
            }
        }
    }

    fn open_invoice(&self, namespace: &str, subscription: &Subscription) -> SimResult<Invoice> {
        let now = self.clock.now();
        let mut invoice = Invoice::for_period(subscription, now);
        self.emit(namespace, EventType::InvoiceCreated, to_payload(&invoice));
        invoice.finalize()?;
        let stored = self.invoices.insert(namespace, invoice)?;
        self.emit(namespace, EventType::InvoiceFinalized, to_payload(&stored));
        Ok(stored)
    }

    fn settle_invoice(
        &self,
        namespace: &str,
        subscription: &Subscription,
        invoice: &Invoice,
    ) -> SimResult<()> {
        let now = self.clock.now();
        let mut transition = Ok(());
        let paid = self.invoices.update(namespace, &invoice.id, |inv| {
            transition = inv.mark_paid(now);
        })?;
        transition?;

        let transaction = BalanceTransaction::charge(
            &subscription.customer_id,
            &paid.id,
            paid.amount_due_cents,
            &paid.currency,
            now,
        );
        self.transactions.insert(namespace, transaction.clone())?;

        let advanced = self.advance_after_payment(namespace, &subscription.id)?;

        self.emit(namespace, EventType::InvoicePaid, to_payload(&paid));
        self.emit(
            namespace,
            EventType::ChargeSucceeded,
            to_payload(&transaction),
        );
        self.emit(
            namespace,
            EventType::CustomerSubscriptionUpdated,
            to_payload(&advanced),
        );
        info!(
            subscription_id = %subscription.id,
            invoice_id = %paid.id,
            amount_cents = paid.amount_due_cents,
            "invoice paid"
        );
        Ok(())
    }

    fn advance_after_payment(
        &self,
        namespace: &str,
        subscription_id: &str,
    ) -> SimResult<Subscription> {
        self.subscriptions.update(namespace, subscription_id, |sub| {
            sub.advance_period();
            sub.attempt_count = 0;
            if sub.status == SubscriptionStatus::PastDue {
                sub.status = SubscriptionStatus::Active;
            }
        })
    }

    fn record_decline(
        &self,
        namespace: &str,
        subscription: &Subscription,
        invoice: &Invoice,
        code: DeclineCode,
    ) -> SimResult<()> {
        let updated = self.subscriptions.update(namespace, &subscription.id, |sub| {
            sub.attempt_count += 1;
            if sub.attempt_count >= PAST_DUE_THRESHOLD
                && sub.status == SubscriptionStatus::Active
            {
                sub.status = SubscriptionStatus::PastDue;
            }
        })?;

        warn!(
            subscription_id = %subscription.id,
            invoice_id = %invoice.id,
            decline_code = %code,
            attempt_count = updated.attempt_count,
            "payment declined"
        );

        let mut payload = to_payload(invoice);
        if let JsonValue::Object(map) = &mut payload {
            map.insert(
                "decline_code".to_string(),
                JsonValue::String(code.to_string()),
            );
            map.insert(
                "attempt_count".to_string(),
                JsonValue::Number(updated.attempt_count.into()),
            );
        }
        self.emit(namespace, EventType::InvoicePaymentFailed, payload);

        if updated.status == SubscriptionStatus::PastDue
            && subscription.status != SubscriptionStatus::PastDue
        {
            self.emit(
                namespace,
                EventType::CustomerSubscriptionUpdated,
                to_payload(&updated),
            );
        }
        Ok(())
    }

    fn emit(&self, namespace: &str, event_type: EventType, payload: JsonValue) {
        let event = Event::new(namespace, event_type, payload, self.clock.now());
        self.chaos.queue_event(event);
    }
}

fn to_payload<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}
