use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Directives used when `RUST_LOG` is unset or unparsable: delaymq's own
/// events at `info`, dependencies only at `warn`.
pub const DEFAULT_FILTER: &str = "warn,delaymq=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber: `RUST_LOG` filter (default
/// [`DEFAULT_FILTER`]), RFC3339 UTC timestamps, compact lines with target
/// and thread.
///
/// Fails if a global subscriber is already set.
pub fn init_logging() -> anyhow::Result<()> {
    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .compact();

    let subscriber = Registry::default().with(env_filter()).with(formatting_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
