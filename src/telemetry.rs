use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for the binary
///
/// `RUST_LOG` wins over the configured level. Output goes to stderr so that
/// command reports on stdout stay clean.
pub fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    // A subscriber may already be installed, e.g. by a test harness.
    let _ = registry.with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr)).try_init();
}
