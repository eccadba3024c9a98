//! Credit balance and per-user credit state.
//!
//! The balance is a tagged variant, not a numeric sentinel: `Unlimited` is a
//! distinct case rather than a magic count, so serialization and comparisons
//! never have to special-case a reserved value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credits granted by each daily renewal.
pub const DEFAULT_DAILY_ALLOWANCE: u32 = 5;

/// A user's credit balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreditBalance {
    /// A finite number of metered generation credits.
    Metered(u32),
    /// No decrement applies for the remainder of the grant day.
    Unlimited,
}

impl CreditBalance {
    /// The metered count, or `None` for `Unlimited`.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Self::Metered(n) => Some(*n),
            Self::Unlimited => None,
        }
    }
}

/// The subset of a user profile the credit policy evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreditState {
    pub balance: CreditBalance,
    /// Timestamp of the most recent renewal or unlimited-grant event.
    /// `None` means the user has never been renewed (fresh account).
    pub last_renewal_at: Option<DateTime<Utc>>,
}

impl UserCreditState {
    /// State of a freshly created account: the default finite allowance and
    /// no renewal timestamp, so the first evaluation stamps one.
    pub fn initial(allowance: u32) -> Self {
        Self {
            balance: CreditBalance::Metered(allowance),
            last_renewal_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_has_no_renewal_stamp() {
        let state = UserCreditState::initial(DEFAULT_DAILY_ALLOWANCE);
        assert_eq!(state.balance, CreditBalance::Metered(5));
        assert!(state.last_renewal_at.is_none());
    }

    #[test]
    fn balance_serialises_without_sentinel_values() {
        let metered = serde_json::to_string(&CreditBalance::Metered(3)).unwrap();
        let unlimited = serde_json::to_string(&CreditBalance::Unlimited).unwrap();
        assert_eq!(metered, r#"{"metered":3}"#);
        assert_eq!(unlimited, r#""unlimited""#);
    }

    #[test]
    fn remaining_is_none_for_unlimited() {
        assert_eq!(CreditBalance::Metered(2).remaining(), Some(2));
        assert_eq!(CreditBalance::Unlimited.remaining(), None);
    }
}
