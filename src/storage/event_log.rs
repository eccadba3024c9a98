use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use uuid::Uuid;

use crate::policy::CreditBalance;

/// Maximum audit log file size before rotation (50 MB).
const ROTATE_BYTES: u64 = 50 * 1024 * 1024;

// ─── Entry ────────────────────────────────────────────────────────────────────

/// What happened to a user's credit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditEventKind {
    /// Daily reset to the allowance.
    Renewal,
    /// Unlimited access granted for the remainder of the day.
    Grant,
    /// A metered or unlimited generation action was permitted.
    Consume,
    /// A generation action was refused.
    Deny,
}

/// One structured JSON line written to the audit log per credit decision.
///
/// All fields are `camelCase` for easy `jq` querying:
/// ```sh
/// jq 'select(.kind == "deny")' ~/.local/share/creditd/audit.log
/// jq '[.userId, .kind, .action] | @tsv' ~/.local/share/creditd/audit.log
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditEvent {
    /// Stable unique ID for this event.
    pub id: String,
    /// RFC-3339 timestamp of the decision (the `now` it was evaluated at).
    pub timestamp: String,
    /// User whose credit state was evaluated.
    pub user_id: String,
    pub kind: CreditEventKind,
    /// Generation action label (`study-plan` | `quiz` | `lesson`) for
    /// consume/deny events; `null` for renewals and grants.
    pub action: Option<String>,
    /// Balance after the decision was applied.
    pub balance_after: CreditBalance,
}

impl CreditEvent {
    pub fn new(
        user_id: impl Into<String>,
        at: DateTime<Utc>,
        kind: CreditEventKind,
        action: Option<String>,
        balance_after: CreditBalance,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: at.to_rfc3339(),
            user_id: user_id.into(),
            kind,
            action,
            balance_after,
        }
    }
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// Append-only structured audit log of credit decisions.
///
/// Writes one JSON line per decision to `{data_dir}/audit.log`.
/// Rotates to `audit.log.1` when the active file reaches 50 MB.
/// The file handle is cached for the process lifetime to avoid the overhead
/// of an `open()` syscall on every decision.
pub struct EventLog {
    path: PathBuf,
    /// Cached, open file handle; `None` until the first write.
    file: Mutex<Option<tokio::fs::File>>,
}

impl EventLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("audit.log"),
            file: Mutex::new(None),
        }
    }

    /// Append one structured entry to the audit log.
    ///
    /// Opens the file lazily on first call.  Rotates to `audit.log.1` when
    /// the active file reaches 50 MB.  Errors are logged at WARN level and
    /// never propagated — a broken audit log must not block credit
    /// decisions.
    pub async fn append(&self, event: &CreditEvent) {
        if let Err(e) = self.try_append(event).await {
            tracing::warn!(err = %e, "audit log write failed");
        }
    }

    async fn try_append(&self, event: &CreditEvent) -> Result<()> {
        let line = serde_json::to_string(event)? + "\n";
        let bytes = line.as_bytes();

        let mut guard = self.file.lock().await;

        // Rotation check: if the on-disk file has grown past 50 MB, close the
        // handle and rename the file before opening a fresh one.
        if guard.is_some() {
            if let Ok(meta) = tokio::fs::metadata(&self.path).await {
                if meta.len() >= ROTATE_BYTES {
                    *guard = None; // drop file handle (flushes on drop)
                    let rotated = self.path.with_extension("log.1");
                    let _ = tokio::fs::rename(&self.path, &rotated).await;
                }
            }
        }

        // Open (or re-open after rotation) lazily.
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(f);
        }

        guard.as_mut().unwrap().write_all(bytes).await?;
        Ok(())
    }

    /// Most recent events, oldest first, optionally filtered to one user.
    ///
    /// Reads only the active log file; rotated history is not consulted.
    /// Unparsable lines are skipped.
    pub async fn recent(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<CreditEvent>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events: Vec<CreditEvent> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .filter(|e: &CreditEvent| user_id.map_or(true, |u| e.user_id == u))
            .collect();

        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        Ok(events)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
