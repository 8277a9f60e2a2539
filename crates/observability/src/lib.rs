//! Process-wide tracing setup shared by stockflow binaries.

/// Install the JSON tracing subscriber.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
