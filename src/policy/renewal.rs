//! Daily credit renewal evaluator.
//!
//! Pure — the caller owns persistence, and must apply the result as a
//! conditional write keyed on the previously observed `last_renewal_at` so
//! that concurrent evaluations on stale snapshots apply at most one renewal
//! per day. Renewal is always a reset to the configured allowance, never an
//! increment: two racing writers produce the same row either way.

use chrono::{DateTime, Utc};

use super::anchor::DayAnchor;
use super::balance::{CreditBalance, UserCreditState};

/// Whether a renewal is due: no renewal has ever been stamped, or the last
/// stamp falls on a different calendar day than `now`.
pub fn renewal_due(state: &UserCreditState, now: DateTime<Utc>, anchor: &DayAnchor) -> bool {
    match state.last_renewal_at {
        None => true,
        Some(last) => !anchor.same_day(last, now),
    }
}

/// The state a renewal resets to.
pub fn renewed_state(allowance: u32, now: DateTime<Utc>) -> UserCreditState {
    UserCreditState {
        balance: CreditBalance::Metered(allowance),
        last_renewal_at: Some(now),
    }
}

/// Evaluate the renewal rule in one step.
///
/// Returns `Some(new_state)` when a renewal is due, `None` otherwise.
/// An expired unlimited grant renews like any stale state — back to the
/// finite daily allowance.
pub fn evaluate_renewal(
    state: &UserCreditState,
    now: DateTime<Utc>,
    anchor: &DayAnchor,
    allowance: u32,
) -> Option<UserCreditState> {
    renewal_due(state, now, anchor).then(|| renewed_state(allowance, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap()
    }

    #[test]
    fn due_when_never_renewed() {
        let state = UserCreditState::initial(5);
        assert!(renewal_due(&state, at(10, 9), &DayAnchor::utc()));
    }

    #[test]
    fn not_due_same_day() {
        let anchor = DayAnchor::utc();
        let state = UserCreditState {
            balance: CreditBalance::Metered(2),
            last_renewal_at: Some(at(10, 0)),
        };
        assert!(!renewal_due(&state, at(10, 23), &anchor));
        assert!(evaluate_renewal(&state, at(10, 23), &anchor, 5).is_none());
    }

    #[test]
    fn due_across_day_boundary_resets_to_allowance() {
        // credits: 5, renewed yesterday, evaluated today 09:00.
        let anchor = DayAnchor::utc();
        let state = UserCreditState {
            balance: CreditBalance::Metered(5),
            last_renewal_at: Some(at(9, 12)),
        };
        let renewed = evaluate_renewal(&state, at(10, 9), &anchor, 5).unwrap();
        assert_eq!(renewed.balance, CreditBalance::Metered(5));
        assert_eq!(renewed.last_renewal_at, Some(at(10, 9)));
    }

    #[test]
    fn reset_is_not_additive() {
        let anchor = DayAnchor::utc();
        for prior in [0u32, 1, 3, 99] {
            let state = UserCreditState {
                balance: CreditBalance::Metered(prior),
                last_renewal_at: Some(at(9, 12)),
            };
            let renewed = evaluate_renewal(&state, at(10, 9), &anchor, 5).unwrap();
            assert_eq!(renewed.balance, CreditBalance::Metered(5));
        }
    }

    #[test]
    fn expired_unlimited_grant_renews_to_metered() {
        let anchor = DayAnchor::utc();
        let state = UserCreditState {
            balance: CreditBalance::Unlimited,
            last_renewal_at: Some(at(9, 8)),
        };
        let renewed = evaluate_renewal(&state, at(10, 9), &anchor, 5).unwrap();
        assert_eq!(renewed.balance, CreditBalance::Metered(5));
    }

    #[test]
    fn day_boundary_follows_the_anchor_offset() {
        // 23:30 UTC on the 10th is already the 11th under UTC+1.
        let anchor = DayAnchor::from_offset_hours(1).unwrap();
        let state = UserCreditState {
            balance: CreditBalance::Metered(4),
            last_renewal_at: Some(at(10, 12)),
        };
        assert!(renewal_due(&state, at(10, 23) + chrono::Duration::minutes(30), &anchor));
        assert!(!renewal_due(&state, at(10, 20), &anchor));
    }
}
