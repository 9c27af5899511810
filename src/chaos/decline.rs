use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// The closed set of decline reasons a simulated payment can fail with.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeclineCode {
    CardDeclined,
    InsufficientFunds,
    ExpiredCard,
    IncorrectCvc,
    IncorrectNumber,
    ProcessingError,
    Fraudulent,
    LostCard,
    StolenCard,
    GenericDecline,
    DoNotHonor,
    PickupCard,
    RestrictedCard,
    SecurityViolation,
    ServiceNotAllowed,
    StopPaymentOrder,
    TransactionNotAllowed,
    TryAgainLater,
    WithdrawalCountLimitExceeded,
    CallIssuer,
    CardVelocityExceeded,
    CurrencyNotSupported,
}

impl DeclineCode {
    pub fn all() -> Vec<DeclineCode> {
        DeclineCode::iter().collect()
    }

    /// Whether a retry with the same card could plausibly succeed. Drives
    /// the hint carried in simulated decline payloads.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds
                | Self::ProcessingError
                | Self::TryAgainLater
                | Self::CardVelocityExceeded
                | Self::WithdrawalCountLimitExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn exactly_twenty_two_codes() {
        assert_eq!(DeclineCode::all().len(), 22);
    }

    #[test]
    fn codes_roundtrip_as_snake_case() {
        for code in DeclineCode::all() {
            let s = code.as_ref();
            assert_eq!(s, s.to_lowercase(), "{s} is not snake_case");
            assert_eq!(DeclineCode::from_str(s).unwrap(), code);
        }
        assert_eq!(DeclineCode::InsufficientFunds.as_ref(), "insufficient_funds");
        assert_eq!(DeclineCode::DoNotHonor.as_ref(), "do_not_honor");
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(DeclineCode::from_str("charge_exceeds_source_limit").is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&DeclineCode::CardDeclined).unwrap();
        assert_eq!(json, "\"card_declined\"");
    }
}
