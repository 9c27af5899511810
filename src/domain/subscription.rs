use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::domain::new_id;
use crate::error::{SimResult, SimulatorError};
use crate::store::Resource;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Statuses picked up by the billing scan.
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::PastDue)
    }

    pub fn valid_transitions(&self) -> &'static [SubscriptionStatus] {
        match self {
            Self::Trialing => &[Self::Active, Self::Canceled],
            Self::Active => &[Self::PastDue, Self::Canceled],
            Self::PastDue => &[Self::Active, Self::Canceled],
            Self::Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PlanInterval {
    Day,
    Week,
    Month,
    Year,
}

impl PlanInterval {
    /// One billing period forward from `from`. Month and year arithmetic
    /// clamps to the end of shorter months (Jan 31 + 1 month = Feb 28).
    pub fn advance(&self, count: u32, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Day => from + Duration::days(count as i64),
            Self::Week => from + Duration::weeks(count as i64),
            Self::Month => from
                .checked_add_months(Months::new(count))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Self::Year => from
                .checked_add_months(Months::new(12 * count))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer_id: String,
    pub price_id: String,
    pub plan_amount_cents: i64,
    pub currency: String,
    pub interval: PlanInterval,
    pub interval_count: u32,
    pub quantity: u32,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
    /// Consecutive failed billing attempts; reset to 0 on any success.
    pub attempt_count: u32,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        customer_id: &str,
        price_id: &str,
        plan_amount_cents: i64,
        currency: &str,
        interval: PlanInterval,
        interval_count: u32,
        now: DateTime<Utc>,
    ) -> SimResult<Self> {
        if plan_amount_cents < 0 {
            return Err(SimulatorError::InvalidInput(
                "plan amount must not be negative".into(),
            ));
        }
        if interval_count == 0 {
            return Err(SimulatorError::InvalidInput(
                "interval count must be at least 1".into(),
            ));
        }
        if currency.len() != 3 {
            return Err(SimulatorError::InvalidInput(format!(
                "currency must be a 3-letter code, got {currency:?}"
            )));
        }
        Ok(Self {
            id: new_id("sub"),
            customer_id: customer_id.to_string(),
            price_id: price_id.to_string(),
            plan_amount_cents,
            currency: currency.to_lowercase(),
            interval,
            interval_count,
            quantity: 1,
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: interval.advance(interval_count, now),
            trial_end: None,
            attempt_count: 0,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Start the subscription in a trial; the first period ends (and billing
    /// starts) when the trial does.
    pub fn with_trial(mut self, trial_end: DateTime<Utc>) -> Self {
        self.status = SubscriptionStatus::Trialing;
        self.trial_end = Some(trial_end);
        self.current_period_end = trial_end;
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity.max(1);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_billable() && self.current_period_end <= now
    }

    /// Roll the period markers forward by one plan interval.
    pub fn advance_period(&mut self) {
        self.current_period_start = self.current_period_end;
        self.current_period_end = self
            .interval
            .advance(self.interval_count, self.current_period_end);
    }

    /// Amount billed per period.
    pub fn period_amount_cents(&self) -> i64 {
        self.plan_amount_cents * self.quantity as i64
    }
}

impl Resource for Subscription {
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
