use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: human-readable lines on stderr, filtered
/// by `RUST_LOG` when set and `default_level` otherwise.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
