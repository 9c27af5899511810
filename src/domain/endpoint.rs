use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::domain::event::event_type_matches;
use crate::domain::new_id;
use crate::error::{SimResult, SimulatorError};
use crate::store::Resource;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EndpointStatus {
    Enabled,
    Disabled,
}

/// A webhook receiver registered by the application under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub url: String,
    pub secret: String,
    /// Exact types, trailing-wildcard prefixes (`"invoice.*"`), or `"*"`.
    pub enabled_events: Vec<String>,
    pub status: EndpointStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Register an endpoint with a freshly generated signing secret.
    pub fn new(url: &str, enabled_events: Vec<String>, now: DateTime<Utc>) -> SimResult<Self> {
        Self::with_secret(url, enabled_events, &generate_secret(), now)
    }

    pub fn with_secret(
        url: &str,
        enabled_events: Vec<String>,
        secret: &str,
        now: DateTime<Utc>,
    ) -> SimResult<Self> {
        validate_url(url)?;
        let enabled_events = if enabled_events.is_empty() {
            vec!["*".to_string()]
        } else {
            for pattern in &enabled_events {
                validate_pattern(pattern)?;
            }
            enabled_events
        };
        Ok(Self {
            id: new_id("we"),
            url: url.to_string(),
            secret: secret.to_string(),
            enabled_events,
            status: EndpointStatus::Enabled,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this endpoint should receive an event of the given type.
    pub fn matches_event(&self, event_type: &str) -> bool {
        self.status == EndpointStatus::Enabled
            && self
                .enabled_events
                .iter()
                .any(|pattern| event_type_matches(pattern, event_type))
    }
}

impl Resource for WebhookEndpoint {
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

/// `whsec_`-prefixed url-safe secret, 32 random bytes.
pub fn generate_secret() -> String {
    let mut secret_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
    format!(
        "whsec_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret_bytes)
    )
}

pub(crate) fn validate_url(raw: &str) -> SimResult<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| SimulatorError::InvalidInput(format!("invalid webhook URL: {raw}")))?;
    // Plain http is fine here: endpoints are local test receivers.
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SimulatorError::InvalidInput(
            "webhook URL must use http or https".into(),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(SimulatorError::InvalidInput(
            "webhook URL must have a host".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_pattern(pattern: &str) -> SimResult<()> {
    if pattern == "*" {
        return Ok(());
    }
    let effective = pattern.strip_suffix(".*").unwrap_or(pattern);
    if effective.is_empty() || effective.contains('*') {
        return Err(SimulatorError::InvalidInput(format!(
            "invalid event filter: {pattern}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn new_endpoint_gets_a_whsec_secret() {
        let ep = WebhookEndpoint::new("https://example.test/hooks", vec![], t0()).unwrap();
        assert!(ep.secret.starts_with("whsec_"));
        assert_eq!(ep.enabled_events, vec!["*"]);
        assert_eq!(ep.status, EndpointStatus::Enabled);
    }

    #[test]
    fn url_validation() {
        assert!(WebhookEndpoint::new("not a url", vec![], t0()).is_err());
        assert!(WebhookEndpoint::new("ftp://example.test/x", vec![], t0()).is_err());
        assert!(WebhookEndpoint::new("http://localhost:8080/hooks", vec![], t0()).is_ok());
    }

    #[test]
    fn pattern_validation() {
        assert!(
            WebhookEndpoint::new("https://e.test/h", vec!["invoice.*".into()], t0()).is_ok()
        );
        assert!(WebhookEndpoint::new("https://e.test/h", vec!["".into()], t0()).is_err());
        assert!(
            WebhookEndpoint::new("https://e.test/h", vec!["inv*ce.paid".into()], t0()).is_err()
        );
    }

    #[test]
    fn disabled_endpoint_matches_nothing() {
        let mut ep = WebhookEndpoint::new("https://e.test/h", vec!["*".into()], t0()).unwrap();
        assert!(ep.matches_event("invoice.paid"));
        ep.status = EndpointStatus::Disabled;
        assert!(!ep.matches_event("invoice.paid"));
    }

    #[test]
    fn matching_honors_filters() {
        let ep = WebhookEndpoint::new(
            "https://e.test/h",
            vec!["invoice.*".into(), "customer.subscription.deleted".into()],
            t0(),
        )
        .unwrap();
        assert!(ep.matches_event("invoice.paid"));
        assert!(ep.matches_event("customer.subscription.deleted"));
        assert!(!ep.matches_event("customer.subscription.created"));
    }
}
