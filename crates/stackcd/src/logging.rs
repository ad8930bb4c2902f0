//! Subscriber setup for the daemon.
//!
//! Library code logs through the `log` facade and opens `tracing` spans
//! around reconciliation steps. [`init_logging`] installs one subscriber that
//! receives both.

use std::str::FromStr;
use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_LEVEL_ENV_VAR: &str = "LOG_LEVEL";
const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Level used when `RUST_LOG` is unset: `LOG_LEVEL` if it names a known
/// level, otherwise `info`.
pub fn default_level(log_level: Option<&str>) -> &'static str {
    match log_level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => DEFAULT_LEVEL,
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = std::env::var(LOG_LEVEL_ENV_VAR).ok();
            EnvFilter::new(default_level(level.as_deref()))
        });

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match format {
            LogFormat::Json => {
                tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
            }
            LogFormat::Pretty => {
                tracing::subscriber::set_global_default(registry.with(fmt::layer().pretty()))
            }
        };
        if let Err(e) = installed {
            eprintln!("tracing subscriber already installed: {}", e);
            return;
        }

        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("log records will not be captured: {}", e);
        }
    });
}
