//! Credit ledger service — the request-handler layer over the policy core.
//!
//! Reads a user's credit-state snapshot, calls the pure evaluator/predicate/
//! gate functions with that snapshot and an explicit `now`, and persists the
//! result as a conditional write keyed on what was observed. A losing racer
//! re-reads and re-evaluates; there is no ambient "already checked" state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::policy::{
    evaluate_consumption, evaluate_renewal, CreditBalance, DayAnchor, GateDecision,
    UserCreditState,
};
use crate::storage::event_log::{CreditEvent, CreditEventKind, EventLog};
use crate::storage::Storage;

/// Conditional-write attempts before giving up on a pathologically
/// contended row.
const MAX_WRITE_ATTEMPTS: u32 = 3;

// ─── Types ────────────────────────────────────────────────────────────────────

/// A metered generation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationAction {
    StudyPlan,
    Quiz,
    Lesson,
}

impl GenerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StudyPlan => "study-plan",
            Self::Quiz => "quiz",
            Self::Lesson => "lesson",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no credit state for user '{0}' — create the account first")]
    UnknownUser(String),
    #[error("credit state for '{user_id}' lost {attempts} consecutive write races")]
    Contended { user_id: String, attempts: u32 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

// ─── Ledger ───────────────────────────────────────────────────────────────────

/// Storage-backed credit ledger for one deployment.
#[derive(Clone)]
pub struct CreditLedger {
    storage: Arc<Storage>,
    events: Arc<EventLog>,
    anchor: DayAnchor,
    daily_allowance: u32,
}

impl CreditLedger {
    pub fn new(
        storage: Arc<Storage>,
        events: Arc<EventLog>,
        anchor: DayAnchor,
        daily_allowance: u32,
    ) -> Self {
        Self {
            storage,
            events,
            anchor,
            daily_allowance,
        }
    }

    /// Create the credit state for a new account: the default finite
    /// allowance, no renewal stamp yet.
    ///
    /// Returns the stored state and whether this call created it.
    pub async fn create_user(&self, user_id: &str) -> Result<(UserCreditState, bool), LedgerError> {
        let initial = UserCreditState::initial(self.daily_allowance);
        let created = self.storage.create_state(user_id, &initial).await?;
        if created {
            info!(user_id, allowance = self.daily_allowance, "credit state created");
            return Ok((initial, true));
        }
        let row = self
            .storage
            .get_state(user_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
        Ok((row.to_state(), false))
    }

    /// The user's current state with any due renewal applied.
    pub async fn state_of(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserCreditState, LedgerError> {
        self.renewed_snapshot(user_id, now).await
    }

    /// Decide one generation action and persist its effect.
    ///
    /// Renews first if due, evaluates the gate against the fresh snapshot,
    /// and commits a metered decrement as a compare-and-set on the count the
    /// gate saw. `Denied` is a normal return — the caller surfaces the
    /// recharge path.
    pub async fn consume(
        &self,
        user_id: &str,
        action: GenerationAction,
        now: DateTime<Utc>,
    ) -> Result<GateDecision, LedgerError> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let state = self.renewed_snapshot(user_id, now).await?;
            let (decision, next) = evaluate_consumption(&state, now, &self.anchor);

            match decision {
                GateDecision::AllowedUnlimited => {
                    debug!(user_id, action = action.as_str(), "consume under unlimited grant");
                    self.record(user_id, now, CreditEventKind::Consume, Some(action), next.balance)
                        .await;
                    return Ok(decision);
                }
                GateDecision::Denied { .. } => {
                    info!(user_id, action = action.as_str(), "generation denied — no credits");
                    self.record(user_id, now, CreditEventKind::Deny, Some(action), next.balance)
                        .await;
                    return Ok(decision);
                }
                GateDecision::AllowedMetered { remaining } => {
                    let observed = match state.balance {
                        CreditBalance::Metered(n) => i64::from(n),
                        // Unreachable: the gate only meters metered balances.
                        CreditBalance::Unlimited => continue,
                    };
                    let applied = self
                        .storage
                        .apply_consumption(user_id, observed, i64::from(remaining))
                        .await?;
                    if applied {
                        info!(user_id, action = action.as_str(), remaining, "credit consumed");
                        self.record(user_id, now, CreditEventKind::Consume, Some(action), next.balance)
                            .await;
                        return Ok(decision);
                    }
                    // Lost a decrement race — re-read and re-evaluate.
                    debug!(user_id, attempt, "consumption write conflicted — retrying");
                }
            }
        }
        Err(LedgerError::Contended {
            user_id: user_id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Grant unlimited access for the remainder of the grant day.
    ///
    /// This is the ledger side of the out-of-band payment flow: called once
    /// the manual payment has been confirmed.
    pub async fn grant(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserCreditState, LedgerError> {
        let applied = self.storage.apply_grant(user_id, now).await?;
        if !applied {
            return Err(LedgerError::UnknownUser(user_id.to_string()));
        }
        info!(user_id, until = %self.anchor.local_date(now), "unlimited access granted");
        self.record(user_id, now, CreditEventKind::Grant, None, CreditBalance::Unlimited)
            .await;
        Ok(UserCreditState {
            balance: CreditBalance::Unlimited,
            last_renewal_at: Some(now),
        })
    }

    /// Recent audit events for one user, oldest first.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<CreditEvent>, LedgerError> {
        Ok(self.events.recent(Some(user_id), limit).await?)
    }

    // ─── Private helpers ──────────────────────────────────────────────────

    /// Fetch the user's row and apply the daily renewal if due.
    ///
    /// The renewal write is guarded on the `last_renewal_at` this read
    /// observed, so concurrent evaluations apply at most one renewal per
    /// day; a guard miss means another writer already renewed, and the
    /// loop re-reads its (equivalent) result.
    async fn renewed_snapshot(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserCreditState, LedgerError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let row = self
                .storage
                .get_state(user_id)
                .await?
                .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
            let state = row.to_state();

            let Some(renewed) = evaluate_renewal(&state, now, &self.anchor, self.daily_allowance)
            else {
                return Ok(state);
            };

            let applied = self
                .storage
                .apply_renewal(user_id, row.last_renewal_at.as_deref(), &renewed)
                .await?;
            if applied {
                info!(user_id, allowance = self.daily_allowance, "daily credits renewed");
                self.record(user_id, now, CreditEventKind::Renewal, None, renewed.balance)
                    .await;
                return Ok(renewed);
            }
            debug!(user_id, "renewal write conflicted — re-reading");
        }
        Err(LedgerError::Contended {
            user_id: user_id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    async fn record(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        kind: CreditEventKind,
        action: Option<GenerationAction>,
        balance_after: CreditBalance,
    ) {
        let event = CreditEvent::new(
            user_id,
            at,
            kind,
            action.map(|a| a.as_str().to_string()),
            balance_after,
        );
        self.events.append(&event).await;
    }
}
