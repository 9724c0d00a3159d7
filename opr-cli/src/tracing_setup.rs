//! Tracing setup for the opr-api binary
//!
//! Usage:
//!   opr-api                             # JSON lines on stdout
//!   opr-api --develop                   # Compact human-readable output
//!   RUST_LOG=opr_server=debug opr-api   # Fine-grained log control
//!
//! Environment variables:
//!   RUST_LOG       # Log filter (default: info)
//!   LOGGING_LEVEL  # Extra per-target levels, "name1=level,name2=level"

use anyhow::{anyhow, Result};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Tracing configuration options
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Human-readable output instead of JSON lines
    pub develop: bool,
}

/// Initialize the global subscriber from the process environment.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter = build_filter(
        std::env::var("RUST_LOG").ok().as_deref(),
        std::env::var("LOGGING_LEVEL").ok().as_deref(),
    );

    if config.develop {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .try_init()
            .map_err(|err| anyhow!(err))
    }
}

/// `rust_log` if it parses, else `info`, plus the `LOGGING_LEVEL` overrides.
pub fn build_filter(rust_log: Option<&str>, overrides: Option<&str>) -> EnvFilter {
    let mut filter = rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    for directive in level_overrides(overrides.unwrap_or_default()) {
        filter = filter.add_directive(directive);
    }
    filter
}

/// Parse `name1=level,name2=level`. Entries without `=` or with an unknown
/// level are skipped. Dotted names map to Rust module paths.
pub fn level_overrides(raw: &str) -> Vec<Directive> {
    raw.split(',')
        .filter_map(|entry| {
            let (name, level) = entry.split_once('=')?;
            let name = name.trim();
            let level = normalize_level(level.trim())?;
            if name.is_empty() {
                return None;
            }
            format!("{}={}", name.replace('.', "::"), level).parse().ok()
        })
        .collect()
}

fn normalize_level(level: &str) -> Option<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" => Some("error"),
        "off" => Some("off"),
        _ => None,
    }
}
