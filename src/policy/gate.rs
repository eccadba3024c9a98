//! Consumption gate — decides whether one generation action is permitted.
//!
//! `Denied` is a decision, not an error: it signals the caller to surface
//! the recharge path, and nothing here ever returns `Err` for a business
//! outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::anchor::DayAnchor;
use super::balance::{CreditBalance, UserCreditState};

/// Outcome of evaluating a single generation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GateDecision {
    /// An active unlimited grant covers the action; no decrement.
    AllowedUnlimited,
    /// A metered credit was spent; `remaining` is the count after decrement.
    AllowedMetered { remaining: u32 },
    /// Not permitted. The reason is user-facing copy for the recharge prompt.
    Denied { reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }

    fn denied_no_credits() -> Self {
        Self::Denied {
            reason: "no credits remaining today".to_string(),
        }
    }

    fn denied_bad_timestamp() -> Self {
        Self::Denied {
            reason: "credit state is stamped in the future".to_string(),
        }
    }
}

/// Whether an unlimited grant is currently in effect: the balance is
/// `Unlimited` and the grant stamp is present, not in the future, and on
/// the same calendar day as `now`.
pub fn has_unlimited_access(
    state: &UserCreditState,
    now: DateTime<Utc>,
    anchor: &DayAnchor,
) -> bool {
    match (state.balance, state.last_renewal_at) {
        (CreditBalance::Unlimited, Some(granted)) => {
            granted <= now && anchor.same_day(granted, now)
        }
        _ => false,
    }
}

/// Evaluate one generation action against `state` at `now`.
///
/// Returns the decision and the state to persist. The state is unchanged
/// except for the metered decrement, which the caller must apply as a
/// compare-and-set on the prior count — two actions evaluated against the
/// same stale snapshot must not both commit.
///
/// A `last_renewal_at` in the future is malformed input and evaluates
/// deny-leaning: no unlimited access, allowance treated as zero.
pub fn evaluate_consumption(
    state: &UserCreditState,
    now: DateTime<Utc>,
    anchor: &DayAnchor,
) -> (GateDecision, UserCreditState) {
    if has_unlimited_access(state, now, anchor) {
        return (GateDecision::AllowedUnlimited, *state);
    }

    if matches!(state.last_renewal_at, Some(last) if last > now) {
        return (GateDecision::denied_bad_timestamp(), *state);
    }

    match state.balance {
        CreditBalance::Metered(n) if n > 0 => {
            let next = UserCreditState {
                balance: CreditBalance::Metered(n - 1),
                last_renewal_at: state.last_renewal_at,
            };
            (GateDecision::AllowedMetered { remaining: n - 1 }, next)
        }
        _ => (GateDecision::denied_no_credits(), *state),
    }
}
