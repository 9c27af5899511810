use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::domain::new_id;
use crate::domain::subscription::Subscription;
use crate::error::{SimResult, SimulatorError};
use crate::store::Resource;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount_cents: i64,
    pub quantity: u32,
}

/// At most one non-void invoice exists per `(subscription, period_start)`
/// pair; the billing engine enforces this by looking up before creating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub subscription_id: String,
    pub customer_id: String,
    pub status: InvoiceStatus,
    pub currency: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub line_items: Vec<LineItem>,
    pub amount_due_cents: i64,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Draft invoice for the subscription's current period, line items
    /// derived from its plan.
    pub fn for_period(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        let line_items = vec![LineItem {
            description: format!(
                "1 x {} (per {})",
                subscription.price_id,
                subscription.interval.as_ref()
            ),
            amount_cents: subscription.plan_amount_cents,
            quantity: subscription.quantity,
        }];
        let amount_due_cents = line_items
            .iter()
            .map(|item| item.amount_cents * item.quantity as i64)
            .sum();
        Self {
            id: new_id("in"),
            subscription_id: subscription.id.clone(),
            customer_id: subscription.customer_id.clone(),
            status: InvoiceStatus::Draft,
            currency: subscription.currency.clone(),
            period_start: subscription.current_period_start,
            period_end: subscription.current_period_end,
            line_items,
            amount_due_cents,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn finalize(&mut self) -> SimResult<()> {
        match self.status {
            InvoiceStatus::Draft => {
                self.status = InvoiceStatus::Open;
                Ok(())
            }
            other => Err(SimulatorError::Conflict(format!(
                "cannot finalize invoice {} in status {}",
                self.id, other
            ))),
        }
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> SimResult<()> {
        match self.status {
            InvoiceStatus::Open => {
                self.status = InvoiceStatus::Paid;
                self.paid_at = Some(now);
                Ok(())
            }
            other => Err(SimulatorError::Conflict(format!(
                "cannot pay invoice {} in status {}",
                self.id, other
            ))),
        }
    }

    pub fn void(&mut self) -> SimResult<()> {
        match self.status {
            InvoiceStatus::Draft | InvoiceStatus::Open => {
                self.status = InvoiceStatus::Void;
                Ok(())
            }
            other => Err(SimulatorError::Conflict(format!(
                "cannot void invoice {} in status {}",
                self.id, other
            ))),
        }
    }

    /// The canonical invoice for a billing period is keyed by its
    /// subscription and period start.
    pub fn covers(&self, subscription_id: &str, period_start: DateTime<Utc>) -> bool {
        self.subscription_id == subscription_id
            && self.period_start == period_start
            && self.status != InvoiceStatus::Void
    }
}

impl Resource for Invoice {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::PlanInterval;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn invoice() -> Invoice {
        let sub = Subscription::new(
            "cus_1",
            "price_basic",
            2000,
            "usd",
            PlanInterval::Month,
            1,
            t0(),
        )
        .unwrap()
        .with_quantity(2);
        Invoice::for_period(&sub, t0())
    }

    #[test]
    fn draft_invoice_totals_its_line_items() {
        let inv = invoice();
        assert_eq!(inv.status, InvoiceStatus::Draft);
        assert_eq!(inv.amount_due_cents, 4000);
        assert_eq!(inv.line_items.len(), 1);
        assert_eq!(inv.currency, "usd");
    }

    #[test]
    fn lifecycle_draft_open_paid() {
        let mut inv = invoice();
        inv.finalize().unwrap();
        assert_eq!(inv.status, InvoiceStatus::Open);
        inv.mark_paid(t0()).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
        assert_eq!(inv.paid_at, Some(t0()));
    }

    #[test]
    fn illegal_transitions_conflict() {
        let mut inv = invoice();
        // Draft cannot be paid directly.
        assert!(inv.mark_paid(t0()).is_err());
        inv.finalize().unwrap();
        assert!(inv.finalize().is_err());
        inv.mark_paid(t0()).unwrap();
        assert!(inv.void().is_err());
    }

    #[test]
    fn covers_matches_period_and_skips_void() {
        let mut inv = invoice();
        let sub_id = inv.subscription_id.clone();
        assert!(inv.covers(&sub_id, t0()));
        assert!(!inv.covers(&sub_id, t0() + chrono::Duration::days(31)));
        assert!(!inv.covers("sub_other", t0()));
        inv.void().unwrap();
        assert!(!inv.covers(&sub_id, t0()));
    }
}
