use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::policy::{DayAnchor, DEFAULT_DAILY_ALLOWANCE};

/// The platform's operating timezone (no DST), as a UTC offset in hours.
const DEFAULT_UTC_OFFSET_HOURS: i32 = 1;

// ─── CreditsConfig ────────────────────────────────────────────────────────────

/// Credit policy configuration (`[credits]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CreditsConfig {
    /// Credits granted by each daily renewal (default: 5).
    pub daily_allowance: u32,
    /// UTC offset, in whole hours, that anchors the calendar day for
    /// renewals and grant expiry (default: +1). Every instance of the
    /// service must use the same value.
    pub utc_offset_hours: i32,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            daily_allowance: DEFAULT_DAILY_ALLOWANCE,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
        }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all sections are optional overrides.
#[derive(Debug, Clone, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    credits: CreditsConfig,
    #[serde(default)]
    observability: ObservabilityConfig,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "config.toml parse error — using defaults");
            None
        }
    }
}

// ─── LedgerConfig ─────────────────────────────────────────────────────────────

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub credits: CreditsConfig,
    pub observability: ObservabilityConfig,
}

impl LedgerConfig {
    /// Resolve configuration for `data_dir`.
    ///
    /// Precedence:
    ///   1. TOML file at `{data_dir}/config.toml`
    ///   2. Built-in defaults
    ///
    /// A missing or malformed file falls back to defaults; it never fails.
    pub fn load(data_dir: PathBuf) -> Self {
        let toml = load_toml(&data_dir).unwrap_or_default();
        Self {
            data_dir,
            credits: toml.credits,
            observability: toml.observability,
        }
    }

    /// The day anchor for the configured offset.
    ///
    /// An out-of-range offset falls back to UTC with a warning rather than
    /// refusing to start.
    pub fn anchor(&self) -> DayAnchor {
        DayAnchor::from_offset_hours(self.credits.utc_offset_hours).unwrap_or_else(|| {
            warn!(
                offset_hours = self.credits.utc_offset_hours,
                "utc_offset_hours out of range — anchoring days to UTC"
            );
            DayAnchor::utc()
        })
    }
}

/// Platform-conventional default data directory.
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/creditd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("creditd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/creditd or ~/.local/share/creditd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("creditd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("creditd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\creditd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("creditd");
        }
    }
    PathBuf::from(".creditd")
}
