use tracing_subscriber::EnvFilter;

/// install a json subscriber filtered by `RUST_LOG`, defaulting to info
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init() {
    init_with_default("info");
}

/// same as [`init`] with a caller-chosen fallback filter
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with_default("debug");
        tracing::info!(component = "telemetry", "subscriber ready");
    }
}
