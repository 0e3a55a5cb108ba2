//! Tracing bootstrap for the terminal client.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,laddrs_chat=info,chat_laddrs=info";

/// Initialize the global tracing subscriber.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `LADDRS_CHAT_LOG`
/// 3) internal default filter
///
/// Logs go to stderr so they do not interleave with the transcript on stdout.
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var("LADDRS_CHAT_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
