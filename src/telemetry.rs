use tracing_subscriber::EnvFilter;

/// Install the process-wide log subscriber. Filtering follows `RUST_LOG`,
/// defaulting to `info`. Logs go to stderr so command output stays on stdout.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
