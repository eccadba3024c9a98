//! Integration tests for the credit ledger against a real SQLite store.
//!
//! Tests cover:
//! 1. Fresh account consumes the full allowance, then is denied
//! 2. Renewal across the day boundary resets to the allowance
//! 3. Unlimited grant covers the rest of the day without decrementing
//! 4. Grant expires at the day boundary and renews back to metered
//! 5. Unknown users are rejected, denial is not an error
//! 6. Audit history records each decision

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use creditd::ledger::{CreditLedger, GenerationAction, LedgerError};
use creditd::policy::{CreditBalance, DayAnchor, GateDecision};
use creditd::storage::event_log::{CreditEventKind, EventLog};
use creditd::storage::Storage;

const ALLOWANCE: u32 = 5;

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn make_ledger() -> (tempfile::TempDir, CreditLedger) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let events = Arc::new(EventLog::new(dir.path()));
    let ledger = CreditLedger::new(storage, events, DayAnchor::utc(), ALLOWANCE);
    (dir, ledger)
}

fn at(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap()
}

// ─── Test 1: metered allowance runs out ──────────────────────────────────────

#[tokio::test]
async fn test_allowance_consumed_then_denied() {
    let (_dir, ledger) = make_ledger().await;
    ledger.create_user("u1").await.unwrap();

    for expected_remaining in (0..ALLOWANCE).rev() {
        let decision = ledger
            .consume("u1", GenerationAction::Quiz, at(10, 9))
            .await
            .unwrap();
        assert_eq!(
            decision,
            GateDecision::AllowedMetered {
                remaining: expected_remaining
            }
        );
    }

    // Sixth action the same day: denied, state unchanged.
    let decision = ledger
        .consume("u1", GenerationAction::Lesson, at(10, 10))
        .await
        .unwrap();
    assert!(matches!(decision, GateDecision::Denied { .. }));

    let state = ledger.state_of("u1", at(10, 11)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Metered(0));
}

// ─── Test 2: day boundary renews ─────────────────────────────────────────────

#[tokio::test]
async fn test_renewal_resets_across_days() {
    let (_dir, ledger) = make_ledger().await;
    ledger.create_user("u1").await.unwrap();

    // First evaluation stamps the first renewal.
    let state = ledger.state_of("u1", at(9, 12)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Metered(ALLOWANCE));
    assert_eq!(state.last_renewal_at, Some(at(9, 12)));

    // Spend two credits on the 9th.
    for _ in 0..2 {
        ledger
            .consume("u1", GenerationAction::StudyPlan, at(9, 13))
            .await
            .unwrap();
    }
    let state = ledger.state_of("u1", at(9, 23)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Metered(3));

    // Next morning: renewal is due and resets (not adds) to the allowance.
    let state = ledger.state_of("u1", at(10, 9)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Metered(ALLOWANCE));
    assert_eq!(state.last_renewal_at, Some(at(10, 9)));
}

// ─── Test 3: unlimited grant ─────────────────────────────────────────────────

#[tokio::test]
async fn test_grant_covers_rest_of_day_without_decrement() {
    let (_dir, ledger) = make_ledger().await;
    ledger.create_user("u1").await.unwrap();

    let state = ledger.grant("u1", at(10, 8)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Unlimited);

    // Granted 08:00, still unlimited at 20:00 — repeatedly.
    for _ in 0..10 {
        let decision = ledger
            .consume("u1", GenerationAction::Quiz, at(10, 20))
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::AllowedUnlimited);
    }

    let state = ledger.state_of("u1", at(10, 21)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Unlimited);
}

// ─── Test 4: grant expires at the day boundary ───────────────────────────────

#[tokio::test]
async fn test_grant_expires_and_renews_to_metered() {
    let (_dir, ledger) = make_ledger().await;
    ledger.create_user("u1").await.unwrap();
    ledger.grant("u1", at(9, 8)).await.unwrap();

    // The next day the grant is spent: renewal resets to the finite allowance.
    let state = ledger.state_of("u1", at(10, 9)).await.unwrap();
    assert_eq!(state.balance, CreditBalance::Metered(ALLOWANCE));
    assert_eq!(state.last_renewal_at, Some(at(10, 9)));

    let decision = ledger
        .consume("u1", GenerationAction::Lesson, at(10, 9))
        .await
        .unwrap();
    assert_eq!(decision, GateDecision::AllowedMetered { remaining: 4 });
}

// ─── Test 5: unknown users and denial semantics ──────────────────────────────

#[tokio::test]
async fn test_unknown_user_is_an_error_denial_is_not() {
    let (_dir, ledger) = make_ledger().await;

    let err = ledger
        .consume("ghost", GenerationAction::Quiz, at(10, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownUser(_)));

    let err = ledger.grant("ghost", at(10, 9)).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownUser(_)));

    // Exhausting credits yields Ok(Denied), not Err.
    ledger.create_user("u1").await.unwrap();
    for _ in 0..ALLOWANCE {
        ledger
            .consume("u1", GenerationAction::Quiz, at(10, 9))
            .await
            .unwrap();
    }
    let outcome = ledger.consume("u1", GenerationAction::Quiz, at(10, 9)).await;
    assert!(matches!(outcome, Ok(GateDecision::Denied { .. })));
}

// ─── Test 6: audit history ───────────────────────────────────────────────────

#[tokio::test]
async fn test_history_records_decisions() {
    let (_dir, ledger) = make_ledger().await;
    ledger.create_user("u1").await.unwrap();
    ledger.create_user("u2").await.unwrap();

    // u1: first consume triggers a renewal, then the spend.
    ledger
        .consume("u1", GenerationAction::StudyPlan, at(10, 9))
        .await
        .unwrap();
    ledger.grant("u1", at(10, 10)).await.unwrap();
    // u2's activity must not appear in u1's history.
    ledger
        .consume("u2", GenerationAction::Quiz, at(10, 11))
        .await
        .unwrap();

    let events = ledger.history("u1", 20).await.unwrap();
    let kinds: Vec<CreditEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CreditEventKind::Renewal,
            CreditEventKind::Consume,
            CreditEventKind::Grant,
        ]
    );
    assert!(events.iter().all(|e| e.user_id == "u1"));
    assert_eq!(events[1].action.as_deref(), Some("study-plan"));
}
