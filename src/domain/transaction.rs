use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::domain::new_id;
use crate::store::Resource;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TransactionKind {
    Charge,
    Refund,
}

/// Ledger record written when a simulated payment settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    pub customer_id: String,
    pub invoice_id: Option<String>,
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl BalanceTransaction {
    pub fn charge(
        customer_id: &str,
        invoice_id: &str,
        amount_cents: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("txn"),
            customer_id: customer_id.to_string(),
            invoice_id: Some(invoice_id.to_string()),
            kind: TransactionKind::Charge,
            amount_cents,
            currency: currency.to_string(),
            created_at: now,
        }
    }

    pub fn refund(
        customer_id: &str,
        invoice_id: Option<&str>,
        amount_cents: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("txn"),
            customer_id: customer_id.to_string(),
            invoice_id: invoice_id.map(str::to_string),
            kind: TransactionKind::Refund,
            amount_cents: -amount_cents,
            currency: currency.to_string(),
            created_at: now,
        }
    }
}

impl Resource for BalanceTransaction {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    // Ledger entries are append-only.
    fn touch(&mut self, _now: DateTime<Utc>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn charge_records_positive_amount() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let txn = BalanceTransaction::charge("cus_1", "in_1", 2000, "usd", now);
        assert!(txn.id.starts_with("txn_"));
        assert_eq!(txn.kind, TransactionKind::Charge);
        assert_eq!(txn.amount_cents, 2000);
        assert_eq!(txn.invoice_id.as_deref(), Some("in_1"));
    }

    #[test]
    fn refund_negates_the_amount() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let txn = BalanceTransaction::refund("cus_1", None, 500, "usd", now);
        assert_eq!(txn.kind, TransactionKind::Refund);
        assert_eq!(txn.amount_cents, -500);
        assert!(txn.invoice_id.is_none());
    }
}
