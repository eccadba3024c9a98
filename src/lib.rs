//! `creditd` — tutoring-platform credit ledger.
//!
//! Decides, for a given user and instant, whether a metered AI generation
//! action (study plan, quiz, lesson) may be consumed, and when the daily
//! credit allowance resets. The policy core is pure; the ledger service
//! persists its decisions to an embedded SQLite store with conditional
//! writes, and the `creditd` binary is the local admin surface over both.

pub mod config;
pub mod ledger;
pub mod policy;
pub mod storage;

pub use ledger::{CreditLedger, GenerationAction, LedgerError};
pub use policy::{CreditBalance, DayAnchor, GateDecision, UserCreditState};
