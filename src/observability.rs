//! Logging setup for the gateway binary.
//!
//! Every tool invocation runs inside a `tool` span carrying the tool name and
//! its invocation id. The JSON format flattens that span onto each line so
//! log pipelines can group a call's events; compact output shows it inline.
//! stdout belongs to CLI results, so all logs go to stderr.

use std::str::FromStr;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "ITSM_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset: gateway events at `info`, and only
/// warnings from dependencies (hyper and reqwest are chatty at `info`).
pub const DEFAULT_FILTER: &str = "warn,itsm_gateway=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact, pretty or json)")),
        }
    }
}

impl LogFormat {
    /// Format from `ITSM_LOG_FORMAT`; unknown values fall back to compact
    /// with a note on stderr, since the subscriber is not up yet.
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(raw) => raw.parse().unwrap_or_else(|err| {
                eprintln!("{LOG_FORMAT_ENV}: {err}");
                LogFormat::Compact
            }),
            Err(_) => LogFormat::Compact,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let registry = tracing_subscriber::registry().with(env_filter());
        let result = match LogFormat::from_env() {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
                .try_init(),
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
