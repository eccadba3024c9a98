use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use creditd::config::{default_data_dir, LedgerConfig};
use creditd::ledger::{CreditLedger, GenerationAction};
use creditd::policy::{CreditBalance, GateDecision, UserCreditState};
use creditd::storage::{event_log::EventLog, Storage};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "creditd",
    about = "Tutoring-platform credit ledger — daily AI-credit entitlements",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for the SQLite database, audit log, and config.toml
    #[arg(long, env = "CREDITD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CREDITD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "CREDITD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Suppress informational output.
    ///
    /// Errors are still printed to stderr. JSON output (--json flags) is
    /// unaffected. Use this flag when piping output to other tools.
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data directory and database.
    ///
    /// Runs migrations and writes nothing else. Safe to re-run.
    ///
    /// Examples:
    ///   creditd init
    ///   creditd --data-dir /var/lib/creditd init
    Init,
    /// Create the credit state for a new user.
    ///
    /// New users start with the daily allowance and no renewal stamp, so
    /// the first evaluation stamps one. Re-running on an existing user is
    /// a no-op.
    ///
    /// Examples:
    ///   creditd create student-42
    Create {
        /// User identifier (the account key in the user-record store)
        user_id: String,
    },
    /// Show a user's current credit state, renewing first if due.
    ///
    /// Examples:
    ///   creditd show student-42
    ///   creditd show student-42 --json
    Show {
        user_id: String,
        /// Emit the state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Spend one credit on a generation action.
    ///
    /// Prints the decision. A denial is a normal outcome (exit code 0) —
    /// it means the user should be pointed at the recharge flow.
    ///
    /// Examples:
    ///   creditd consume student-42 --action quiz
    ///   creditd consume student-42 --action study-plan
    Consume {
        user_id: String,
        /// Generation action being paid for
        #[arg(long, value_enum)]
        action: GenerationAction,
    },
    /// Grant unlimited access for the remainder of the day.
    ///
    /// The ledger side of the manual payment flow: run this once the
    /// payment has been confirmed out-of-band.
    ///
    /// Examples:
    ///   creditd grant student-42
    Grant { user_id: String },
    /// Run the daily renewal check for a user.
    ///
    /// Resets the metered count to the daily allowance when the last
    /// renewal was on a previous day; otherwise reports the current state.
    ///
    /// Examples:
    ///   creditd renew student-42
    Renew { user_id: String },
    /// Show recent audit events for a user.
    ///
    /// Examples:
    ///   creditd history student-42
    ///   creditd history student-42 --limit 50
    History {
        user_id: String,
        /// Maximum events to print (most recent)
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(
        args.log.as_deref().unwrap_or("warn"),
        args.log_file.as_deref(),
    );

    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    let config = LedgerConfig::load(data_dir);

    let storage = Arc::new(
        Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?,
    );
    let events = Arc::new(EventLog::new(&config.data_dir));
    let ledger = CreditLedger::new(
        storage,
        events,
        config.anchor(),
        config.credits.daily_allowance,
    );

    match args.command {
        Command::Init => {
            info!(data_dir = %config.data_dir.display(), "database initialised");
            if !args.quiet {
                println!("initialised {}", config.data_dir.display());
            }
        }
        Command::Create { user_id } => {
            let (state, created) = ledger.create_user(&user_id).await?;
            if !args.quiet {
                if created {
                    println!("created {user_id}: {}", describe(&state));
                } else {
                    println!("{user_id} already exists: {}", describe(&state));
                }
            }
        }
        Command::Show { user_id, json } => {
            let state = ledger.state_of(&user_id, Utc::now()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if !args.quiet {
                println!("{user_id}: {}", describe(&state));
            }
        }
        Command::Consume { user_id, action } => {
            let decision = ledger.consume(&user_id, action, Utc::now()).await?;
            if !args.quiet {
                match &decision {
                    GateDecision::AllowedUnlimited => {
                        println!("allowed ({}) — unlimited grant active", action.as_str());
                    }
                    GateDecision::AllowedMetered { remaining } => {
                        println!("allowed ({}) — {remaining} credits left today", action.as_str());
                    }
                    GateDecision::Denied { reason } => {
                        println!("denied ({}) — {reason}; recharge to continue", action.as_str());
                    }
                }
            }
        }
        Command::Grant { user_id } => {
            let state = ledger.grant(&user_id, Utc::now()).await?;
            if !args.quiet {
                println!("{user_id}: {}", describe(&state));
            }
        }
        Command::Renew { user_id } => {
            let state = ledger.state_of(&user_id, Utc::now()).await?;
            if !args.quiet {
                println!("{user_id}: {}", describe(&state));
            }
        }
        Command::History { user_id, limit } => {
            let events = ledger.history(&user_id, limit).await?;
            if events.is_empty() && !args.quiet {
                println!("no recorded events for {user_id}");
            }
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}

fn describe(state: &UserCreditState) -> String {
    let balance = match state.balance {
        CreditBalance::Unlimited => "unlimited access (today)".to_string(),
        CreditBalance::Metered(n) => format!("{n} credits remaining"),
    };
    match &state.last_renewal_at {
        Some(at) => format!("{balance}, last renewed {}", at.to_rfc3339()),
        None => format!("{balance}, never renewed"),
    }
}

// ─── Logging ──────────────────────────────────────────────────────────────────

/// Initialise tracing: stderr by default, plus a daily-rotated file when
/// `log_file` is given. Returns the appender guard that must stay alive for
/// the process lifetime.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("creditd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stderr-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stderr",
                dir.display()
            );
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .with_writer(std::io::stderr)
                .compact()
                .init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(EnvFilter::new(log_level))
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(non_blocking))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .with_writer(std::io::stderr)
            .compact()
            .init();
        None
    }
}
