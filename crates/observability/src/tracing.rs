//! Tracing subscriber initialization.
//!
//! Ledger calls emit one event per outcome (`info` committed, `warn`
//! rejected, `error` storage failure) and `debug` events per contention
//! retry; `RUST_LOG` picks which of those reach the output.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize tracing for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    // JSON lines with span context, so ledger call fields (actor, product,
    // quantities) travel with every event.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        ::tracing::info!(outcome = "success", "observability initialized twice");
    }
}
