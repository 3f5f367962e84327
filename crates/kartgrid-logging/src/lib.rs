//! Tracing setup for kartgrid binaries and tests.
//!
//! `RUST_LOG` wins when set; otherwise the given default directive applies.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "kartgrid=info,kartgrid_core=info";

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into())
}

/// Install the global subscriber. Call once at process start.
pub fn init(default_directive: &str) {
    tracing_subscriber::registry()
        .with(filter(default_directive))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Subscriber for tests: output captured per test, repeat calls are fine.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter("kartgrid_core=debug"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
