//! `policy` — the credit entitlement policy core.
//!
//! Everything in this module is pure: functions take a state snapshot and an
//! explicit `now`, and return decisions and replacement states as values.
//! Persistence, retries, and audit belong to the ledger service layer.
//!
//! - **Day anchor** — server-fixed calendar-day semantics for "same day".
//! - **Balance** — tagged `Metered` / `Unlimited` credit balance and the
//!   per-user state the policy evaluates.
//! - **Renewal evaluator** — decides when the daily reset to the allowance
//!   is due.
//! - **Consumption gate** — decides whether one generation action is
//!   permitted and computes the resulting state.

pub mod anchor;
pub mod balance;
pub mod gate;
pub mod renewal;

// ─── Top-level re-exports ─────────────────────────────────────────────────────

pub use anchor::DayAnchor;
pub use balance::{CreditBalance, UserCreditState, DEFAULT_DAILY_ALLOWANCE};
pub use gate::{evaluate_consumption, has_unlimited_access, GateDecision};
pub use renewal::{evaluate_renewal, renewal_due, renewed_state};
